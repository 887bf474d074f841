//! CLI `re-embed` command — regenerate all embeddings with the current model.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::config::TacitConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::store::embedding_to_bytes;

const BATCH_SIZE: usize = 32;

/// Re-embed all live facts with the currently configured model, then pin it.
pub fn re_embed(config: &TacitConfig) -> Result<()> {
    let conn = super::open_existing(config)?;

    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;

    let total = rewrite_embeddings(&conn, provider.as_ref())?;
    if total == 0 {
        println!("No live facts to re-embed.");
        return Ok(());
    }

    crate::db::migrations::set_embedding_model(&conn, provider.model_id())?;
    println!("Re-embedded {total} facts. Model pinned to '{}'.", provider.model_id());
    Ok(())
}

/// Replace the vector of every live fact with one from `provider`. Returns
/// the number of facts re-embedded.
fn rewrite_embeddings(conn: &Connection, provider: &dyn EmbeddingProvider) -> Result<usize> {
    let mut stmt = conn
        .prepare("SELECT id, project_id, text FROM facts WHERE superseded_by IS NULL")?;
    let facts: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let total = facts.len();
    let mut done = 0usize;
    for chunk in facts.chunks(BATCH_SIZE) {
        let texts: Vec<&str> = chunk.iter().map(|(_, _, text)| text.as_str()).collect();
        let embeddings = provider
            .embed_batch(&texts)
            .context("embedding batch failed")?;

        for ((id, project_id, _), emb) in chunk.iter().zip(embeddings.iter()) {
            conn.execute("DELETE FROM facts_vec WHERE id = ?1", params![id])?;
            conn.execute(
                "INSERT INTO facts_vec (id, project_id, embedding) VALUES (?1, ?2, ?3)",
                params![id, project_id, embedding_to_bytes(emb)],
            )?;
        }
        done += chunk.len();
        if total > BATCH_SIZE {
            println!("  {done}/{total}");
        }
    }
    Ok(total)
}
