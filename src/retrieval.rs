//! Fused retrieval over the three lookup paths.
//!
//! A recall runs keyword (FTS5 BM25), vector (sqlite-vec KNN), and graph
//! (k-hop entity walk) lookups, min-max-normalizes each path's scores,
//! fuses them with configured weights, and applies an exponential recency
//! decay so newer facts outrank older ones at equal relevance. A path that
//! fails is dropped and its weight redistributed across the survivors;
//! recall errors only when no path at all could run.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::dedup::mmr_keep_indices;
use crate::embedding::EmbeddingProvider;
use crate::store::types::Fact;
use crate::store::{embedding_to_bytes, facts, graph, l2_to_cosine};

/// One recalled fact with its fused score and provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    #[serde(flatten)]
    pub fact: Fact,
    pub score: f64,
}

/// The full recall result.
#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub hits: Vec<RecallHit>,
    /// Paths that could not run this time ("vector", "keyword", "graph").
    pub unavailable_paths: Vec<String>,
}

/// Retrieve the top-`k` live facts for a query within one project.
pub fn recall(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    project_id: &str,
    query: &str,
    k: usize,
    config: &RetrievalConfig,
) -> Result<RecallResponse> {
    let limit = config.candidate_limit;
    let mut unavailable: Vec<String> = Vec::new();

    let vector_scores = match provider.embed(query) {
        Ok(embedding) => match knn_search(conn, project_id, &embedding, limit) {
            Ok(results) => Some(
                results
                    .into_iter()
                    .map(|(id, distance)| (id, l2_to_cosine(distance)))
                    .collect::<Vec<_>>(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "vector path failed, degrading");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, degrading to keyword/graph");
            None
        }
    };
    if vector_scores.is_none() {
        unavailable.push("vector".to_string());
    }

    let keyword_scores = match fts_search(conn, query, limit) {
        Ok(results) => Some(results),
        Err(e) => {
            tracing::warn!(error = %e, "keyword path failed, degrading");
            unavailable.push("keyword".to_string());
            None
        }
    };

    let graph_scores = match graph_search(conn, project_id, query, config.max_hops as u32, limit) {
        Ok(Some(results)) => Some(results),
        Ok(None) => {
            // No query token resolved to a known entity: nothing to walk
            unavailable.push("graph".to_string());
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "graph path failed, degrading");
            unavailable.push("graph".to_string());
            None
        }
    };

    if vector_scores.is_none() && keyword_scores.is_none() && graph_scores.is_none() {
        bail!("recall failed: no retrieval path available");
    }

    // Fuse normalized path scores, redistributing weight from missing paths
    let paths: Vec<(f64, HashMap<String, f64>)> = [
        (config.vector_weight, vector_scores),
        (config.keyword_weight, keyword_scores),
        (config.graph_weight, graph_scores),
    ]
    .into_iter()
    .filter_map(|(weight, scores)| scores.map(|s| (weight, min_max_normalize(&s))))
    .collect();
    let total_weight: f64 = paths.iter().map(|(w, _)| w).sum();

    let mut fused: HashMap<String, f64> = HashMap::new();
    for (weight, scores) in &paths {
        for (id, score) in scores {
            *fused.entry(id.clone()).or_insert(0.0) += (weight / total_weight) * score;
        }
    }

    // Hydrate, dropping superseded facts and anything outside the project
    let now = chrono::Utc::now();
    let mut candidates: Vec<RecallHit> = Vec::new();
    for (id, score) in fused {
        let Some(fact) = facts::get_fact(conn, &id)? else {
            continue;
        };
        if fact.project_id != project_id || fact.superseded_by.is_some() {
            continue;
        }
        let age_days = chrono::DateTime::parse_from_rfc3339(&fact.created_at)
            .map(|t| {
                (now.signed_duration_since(t.with_timezone(&chrono::Utc)).num_seconds() as f64
                    / 86_400.0)
                    .max(0.0)
            })
            .unwrap_or(0.0);
        let score = score * (-config.recency_lambda * age_days).exp();
        candidates.push(RecallHit { fact, score });
    }

    // Deterministic order: score, then recency, then ID
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
            .then_with(|| a.fact.id.cmp(&b.fact.id))
    });

    // Near-duplicate suppression before truncation, so a dropped duplicate
    // frees a slot for the next distinct fact
    let embeddings: Vec<Option<Vec<f32>>> = candidates
        .iter()
        .map(|hit| facts::get_embedding(conn, &hit.fact.id))
        .collect::<Result<Vec<_>>>()?;
    let kept = mmr_keep_indices(&embeddings, config.mmr_threshold);
    let kept: HashSet<usize> = kept.into_iter().collect();
    let hits: Vec<RecallHit> = candidates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| kept.contains(i))
        .map(|(_, hit)| hit)
        .take(k)
        .collect();

    // The one write on the read path: access counts feed future ranking and
    // maintenance decisions. Safe alongside a concurrent ingester under WAL.
    let returned: Vec<String> = hits.iter().map(|h| h.fact.id.clone()).collect();
    facts::bump_access(conn, &returned)?;

    Ok(RecallResponse {
        hits,
        unavailable_paths: unavailable,
    })
}

/// sqlite-vec KNN within one project's partition: (id, L2 distance) pairs,
/// nearest first. Scoping the scan keeps `limit` meaningful — other projects'
/// vectors cannot occupy the candidate slots.
fn knn_search(
    conn: &Connection,
    project_id: &str,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let embedding_bytes = embedding_to_bytes(embedding);
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM facts_vec \
         WHERE embedding MATCH ?1 AND project_id = ?2 ORDER BY distance LIMIT ?3",
    )?;
    let results = stmt
        .query_map(params![embedding_bytes, project_id, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// FTS5 BM25 keyword search. FTS5 rank is negative (more negative = better),
/// so scores are negated before normalization.
fn fts_search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT id, rank FROM facts_fts WHERE facts_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let results = stmt
        .query_map(params![escaped, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, -row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

fn graph_search(
    conn: &Connection,
    project_id: &str,
    query: &str,
    max_hops: u32,
    limit: usize,
) -> Result<Option<Vec<(String, f64)>>> {
    let seeds = graph::seed_entities(conn, project_id, query)?;
    if seeds.is_empty() {
        return Ok(None);
    }
    let hits = graph::related_facts(conn, project_id, &seeds, max_hops)?;
    Ok(Some(
        hits.into_iter()
            .take(limit)
            .map(|h| (h.fact_id, h.score))
            .collect(),
    ))
}

/// Escape a query for FTS5 MATCH: quote each term, join with OR so a
/// natural-language query matches facts sharing any term.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter_map(|word| {
            let clean = word.replace('"', "");
            (clean.chars().count() > 1).then(|| format!("\"{clean}\""))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Min-max normalize scores into `[0, 1]`; a degenerate range maps to 1.0.
fn min_max_normalize(scores: &[(String, f64)]) -> HashMap<String, f64> {
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|(id, s)| {
            let norm = if max > min { (s - min) / (max - min) } else { 1.0 };
            (id.clone(), norm)
        })
        .collect()
}
