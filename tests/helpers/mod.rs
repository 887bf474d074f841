#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use rusqlite::Connection;
use tacit::config::TacitConfig;
use tacit::db;
use tacit::embedding::{EmbeddingProvider, EMBEDDING_DIM};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Config with test-friendly defaults (no retries sleeping for long).
pub fn test_config() -> TacitConfig {
    let mut config = TacitConfig::default();
    config.ingest.max_retries = 1;
    config.ingest.retry_base_ms = 1;
    config
}

/// Deterministic embedding with a spike at a position derived from the text.
/// Distinct texts land on (almost always) distinct axes, so they read as
/// dissimilar; identical texts always agree.
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[(hash % EMBEDDING_DIM as u64) as usize] = 1.0;
    v
}

/// Deterministic embedding with a spike at `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed % EMBEDDING_DIM] = 1.0;
    v
}

/// A unit vector at cosine similarity `cos` to `test_embedding(seed)`.
pub fn similar_embedding(seed: usize, cos: f32) -> Vec<f32> {
    let mut v = test_embedding(seed);
    let other = (seed + 1) % EMBEDDING_DIM;
    v[seed % EMBEDDING_DIM] = cos;
    v[other] = (1.0 - cos * cos).sqrt();
    v
}

/// Embedding provider for tests: per-text overrides on top of the hash
/// fallback. Overrides let a test decide exactly which texts count as
/// semantically similar.
pub struct StubProvider {
    overrides: HashMap<String, Vec<f32>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, text: &str, embedding: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), embedding);
        self
    }
}

impl EmbeddingProvider for StubProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self
            .overrides
            .get(text)
            .cloned()
            .unwrap_or_else(|| hash_embedding(text)))
    }

    fn model_id(&self) -> &str {
        "stub-test-model"
    }
}

/// Provider whose every call fails, for degraded-mode tests.
pub struct FailingProvider;

impl EmbeddingProvider for FailingProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding endpoint unreachable")
    }

    fn model_id(&self) -> &str {
        "stub-test-model"
    }
}

/// Write a JSONL transcript of user messages into a temp dir, one per line.
pub fn write_transcript(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        let event = serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": line},
        });
        writeln!(file, "{event}").unwrap();
    }
    path
}

/// Append more user messages to an existing transcript.
pub fn append_transcript(path: &PathBuf, lines: &[&str]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    for line in lines {
        let event = serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": line},
        });
        writeln!(file, "{event}").unwrap();
    }
}
