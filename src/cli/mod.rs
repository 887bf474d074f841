//! Command implementations for the `tacit` binary.
//!
//! Each command opens the database itself: invocations are short-lived, so
//! there is no long-running connection to share.

pub mod doctor;
pub mod re_embed;
pub mod stats;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::TacitConfig;
use crate::{db, embedding, ingest, retrieval};

/// Run extraction over a transcript and print the run report as JSON.
pub fn extract(
    config: &TacitConfig,
    transcript: &Path,
    session_id: &str,
    project: Option<&str>,
) -> Result<()> {
    let project_id = project.unwrap_or(&config.storage.default_project);
    let mut conn = db::open_database(config.resolved_db_path())?;

    let provider = embedding::create_provider(&config.embedding)?;
    embedding::verify_model(&conn, provider.model_id())?;
    let extractor = crate::extract::create_extractor(&config.extraction)?;

    let report = ingest::extract_session(
        &mut conn,
        provider.as_ref(),
        extractor.as_ref(),
        transcript,
        project_id,
        session_id,
        config,
    )?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Query the store and print ranked hits as JSON.
pub fn recall(config: &TacitConfig, query: &str, k: Option<usize>, project: Option<&str>) -> Result<()> {
    let project_id = project.unwrap_or(&config.storage.default_project);
    let conn = db::open_database(config.resolved_db_path())?;

    let provider = embedding::create_provider(&config.embedding)?;
    embedding::verify_model(&conn, provider.model_id())?;

    let response = retrieval::recall(
        &conn,
        provider.as_ref(),
        project_id,
        query,
        k.unwrap_or(config.retrieval.default_k),
        &config.retrieval,
    )?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Print a markdown context block for session startup.
pub fn inject(
    config: &TacitConfig,
    query: Option<&str>,
    limit: usize,
    project: Option<&str>,
) -> Result<()> {
    let project_id = project.unwrap_or(&config.storage.default_project);
    let conn = db::open_database(config.resolved_db_path())?;

    let block = match query {
        Some(query) => {
            let provider = embedding::create_provider(&config.embedding)?;
            embedding::verify_model(&conn, provider.model_id())?;
            crate::inject::inject_query(
                &conn,
                provider.as_ref(),
                project_id,
                query,
                limit,
                &config.retrieval,
            )?
        }
        None => crate::inject::inject_recent(&conn, project_id, limit)?,
    };

    if !block.is_empty() {
        print!("{block}");
    }
    Ok(())
}

/// Open the database read-only-ish for inspection commands.
pub(crate) fn open_existing(config: &TacitConfig) -> Result<rusqlite::Connection> {
    let db_path = config.resolved_db_path();
    anyhow::ensure!(
        db_path.exists(),
        "no database at {} (run `tacit extract` first)",
        db_path.display()
    );
    db::open_database(&db_path).context("failed to open database")
}
