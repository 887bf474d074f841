//! SQL DDL for all tacit tables.
//!
//! Defines the `facts`, `facts_fts` (FTS5), `facts_vec` (vec0), `entities`,
//! `fact_entities`, `relations`, `session_markers`, `session_locks`,
//! `ingest_log`, and `schema_meta` tables. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization. Every domain table carries `project_id` as a
//! first-class column — project scoping is never encoded in a file path.

use rusqlite::Connection;

/// Dimension of stored embedding vectors (nomic-embed-text).
pub const EMBEDDING_DIM: usize = 768;

/// All schema DDL statements for tacit's core tables.
const SCHEMA_SQL: &str = r#"
-- Atomic units of knowledge
CREATE TABLE IF NOT EXISTS facts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    source_session_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('decision','correction','constraint','pattern','fact')),
    text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0,
    span_start INTEGER NOT NULL DEFAULT 0,
    span_end INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    superseded_by TEXT REFERENCES facts(id),
    reinforces TEXT REFERENCES facts(id),
    UNIQUE(project_id, text_hash)
);

CREATE INDEX IF NOT EXISTS idx_facts_project ON facts(project_id);
CREATE INDEX IF NOT EXISTS idx_facts_kind ON facts(project_id, kind);
CREATE INDEX IF NOT EXISTS idx_facts_session ON facts(project_id, source_session_id);
CREATE INDEX IF NOT EXISTS idx_facts_superseded ON facts(superseded_by);
CREATE INDEX IF NOT EXISTS idx_facts_created ON facts(project_id, created_at);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts USING fts5(
    text,
    id UNINDEXED,
    project_id UNINDEXED,
    content='facts',
    content_rowid='rowid'
);

-- Named things: people, tools, concepts, files, project artifacts
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    name_norm TEXT NOT NULL,
    kind TEXT NOT NULL,
    mention_count INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    UNIQUE(project_id, name_norm, kind)
);

CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project_id);
CREATE INDEX IF NOT EXISTS idx_entities_norm ON entities(project_id, name_norm);

-- Which entities a fact mentions
CREATE TABLE IF NOT EXISTS fact_entities (
    fact_id TEXT NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    PRIMARY KEY (fact_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_fact_entities_entity ON fact_entities(entity_id);

-- Graph edges between entities; repeated assertion bumps weight
CREATE TABLE IF NOT EXISTS relations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    src_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    dst_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL CHECK(relation_type IN
        ('contradicts','supersedes','depends_on','rejected_in_favor_of','mentions')),
    weight REAL NOT NULL DEFAULT 1.0,
    source_fact_id TEXT REFERENCES facts(id),
    created_at TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    UNIQUE(project_id, src_entity_id, dst_entity_id, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_relations_src ON relations(src_entity_id);
CREATE INDEX IF NOT EXISTS idx_relations_dst ON relations(dst_entity_id);

-- Per-session extraction progress: makes re-extraction incremental
CREATE TABLE IF NOT EXISTS session_markers (
    project_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    last_offset INTEGER NOT NULL DEFAULT 0,
    prefix_hash TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_id, session_id)
);

-- Advisory single-writer lock per (project, session)
CREATE TABLE IF NOT EXISTS session_locks (
    project_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    PRIMARY KEY (project_id, session_id)
);

-- Audit log of fact lifecycle operations
CREATE TABLE IF NOT EXISTS ingest_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','supersede','reinforce')),
    fact_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
/// `project_id` is a partition key: KNN queries constrained on it scan only
/// that project's vectors, so neighbors from other projects can never crowd
/// same-project candidates out of a LIMIT.
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS facts_vec USING vec0(
    id TEXT PRIMARY KEY,
    project_id TEXT PARTITION KEY,
    embedding FLOAT[768]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
