use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tacit::{cli, config};

#[derive(Parser)]
#[command(
    name = "tacit",
    version,
    about = "Persistent knowledge store for a personal coding agent"
)]
struct Cli {
    /// Path to a config file (default: ~/.tacit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project scope (default: from config)
    #[arg(long, short, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract facts from a session transcript
    Extract {
        /// Path to the JSONL transcript
        transcript: PathBuf,
        /// Session identifier (defaults to the transcript file stem)
        #[arg(long)]
        session: Option<String>,
    },
    /// Query stored knowledge
    Recall {
        query: String,
        /// Number of results
        #[arg(long, short)]
        k: Option<usize>,
    },
    /// Print a markdown context block for a new session
    Inject {
        /// Optional query; without it, recent high-value facts are used
        #[arg(long)]
        query: Option<String>,
        /// Maximum facts to include
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show store statistics
    Stats,
    /// Run database diagnostics
    Doctor,
    /// Regenerate all embeddings with the configured model
    ReEmbed,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => config::TacitConfig::load_from(path)?,
        None => config::TacitConfig::load()?,
    };

    // Log to stderr so stdout stays clean for JSON and markdown output
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project = args.project.as_deref();
    match args.command {
        Command::Extract {
            transcript,
            session,
        } => {
            let session_id = match session {
                Some(session) => session,
                None => transcript
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "default".to_string()),
            };
            cli::extract(&config, &transcript, &session_id, project)?;
        }
        Command::Recall { query, k } => {
            cli::recall(&config, &query, k, project)?;
        }
        Command::Inject { query, limit } => {
            cli::inject(&config, query.as_deref(), limit, project)?;
        }
        Command::Stats => {
            cli::stats::stats(&config, project)?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
        Command::ReEmbed => {
            cli::re_embed::re_embed(&config)?;
        }
    }

    Ok(())
}
