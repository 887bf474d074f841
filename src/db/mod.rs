pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the tacit database at the given path, with all extensions
/// loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL lets unbounded readers run alongside the single ingest writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Concurrent invocations briefly contend on the write lock
    conn.pragma_update(None, "busy_timeout", "5000")?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    verify_capabilities(&conn)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Fail fast if a required index backend capability is missing, before any
/// ingestion or query traffic is accepted.
pub fn verify_capabilities(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT vec_version()", [], |r| r.get::<_, String>(0))
        .context("sqlite-vec extension unavailable: vector index cannot be used")?;
    conn.query_row(
        "SELECT count(*) FROM pragma_module_list WHERE name = 'fts5'",
        [],
        |r| r.get::<_, i64>(0),
    )
    .ok()
    .filter(|n| *n > 0)
    .context("SQLite build lacks FTS5: keyword index cannot be used")?;
    Ok(())
}

/// Summary of database health for the `doctor` command.
pub struct HealthReport {
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub fact_count: i64,
    pub live_fact_count: i64,
    pub entity_count: i64,
    pub relation_count: i64,
    pub log_count: i64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

/// Run integrity and capability checks against an open database.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let schema_version = migrations::get_schema_version(conn)?;
    let sqlite_vec_version: String =
        conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;
    let embedding_model = migrations::get_embedding_model(conn)?;

    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, [], |r| r.get(0))?)
    };
    let fact_count = count("SELECT COUNT(*) FROM facts")?;
    let live_fact_count =
        count("SELECT COUNT(*) FROM facts WHERE superseded_by IS NULL")?;
    let entity_count = count("SELECT COUNT(*) FROM entities")?;
    let relation_count = count("SELECT COUNT(*) FROM relations")?;
    let log_count = count("SELECT COUNT(*) FROM ingest_log")?;

    let integrity: String =
        conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    let integrity_ok = integrity == "ok";

    Ok(HealthReport {
        schema_version,
        sqlite_vec_version,
        embedding_model,
        fact_count,
        live_fact_count,
        entity_count,
        relation_count,
        log_count,
        integrity_ok,
        integrity_details: integrity,
    })
}
