//! Forward-only schema migrations.
//!
//! The schema version lives in `schema_meta`; opening a database runs every
//! migration between the stored version and [`CURRENT_SCHEMA_VERSION`]. A
//! database written by a newer binary is refused rather than half-understood.

use anyhow::Result;
use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Steps from version N-1 to N, in order.
const MIGRATIONS: &[(u32, fn(&Connection) -> rusqlite::Result<()>)] =
    &[(2, pin_model_for_existing_vectors)];

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Get the stored embedding model identifier, if any.
///
/// Vectors produced by different models must never be compared, so the model
/// that produced `facts_vec` rows is pinned here the first time vectors are
/// written. A fresh database has no pin and accepts whatever model the config
/// names.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Set the stored embedding model identifier.
pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Run any pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut version = get_schema_version(conn)?;
    anyhow::ensure!(
        version <= CURRENT_SCHEMA_VERSION,
        "database schema is version {version}, but this binary only knows up to \
         {CURRENT_SCHEMA_VERSION}; upgrade tacit"
    );

    for (target, step) in MIGRATIONS {
        if version >= *target {
            continue;
        }
        tracing::info!(from = version, to = *target, "running migration");
        step(conn)?;
        conn.execute(
            "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
            [target.to_string()],
        )?;
        version = *target;
    }

    Ok(())
}

/// v2: pin the embedding model for databases that already hold vectors.
///
/// Version-1 stores could only have been filled by the built-in default
/// model, so their vectors get pinned to it. A database with no vectors gets
/// no pin; the model is recorded on first use instead.
fn pin_model_for_existing_vectors(conn: &Connection) -> rusqlite::Result<()> {
    let vectors: i64 = conn.query_row("SELECT COUNT(*) FROM facts_vec", [], |r| r.get(0))?;
    if vectors > 0 {
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) \
             VALUES ('embedding_model', 'nomic-embed-text')",
            [],
        )?;
    }
    Ok(())
}
