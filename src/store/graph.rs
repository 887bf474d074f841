//! Bounded k-hop walk over the entity relation graph.
//!
//! Seeds are entities whose normalized names appear in the query. The walk
//! expands up to `max_hops` hops in both edge directions, attenuating scores
//! by hop distance and edge weight, then projects entity scores onto the
//! facts that mention them. Scores are relative ranking signals, not
//! probabilities.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{params, Connection};

use super::normalize_name;

/// A fact reached through the graph, with its accumulated path score.
#[derive(Debug, Clone)]
pub struct GraphHit {
    pub fact_id: String,
    pub score: f64,
}

/// Per-hop attenuation applied to each traversed edge.
const HOP_DECAY: f64 = 0.5;

/// Resolve query tokens (and adjacent-token bigrams) against entity names.
/// Returns seed entity IDs; empty means the graph path has nothing to walk.
pub fn seed_entities(conn: &Connection, project_id: &str, query: &str) -> Result<Vec<String>> {
    let norm = normalize_name(query);
    let tokens: Vec<&str> = norm.split(' ').filter(|t| !t.is_empty()).collect();

    let mut candidates: Vec<String> = Vec::new();
    for token in &tokens {
        candidates.push((*token).to_string());
    }
    for pair in tokens.windows(2) {
        candidates.push(format!("{} {}", pair[0], pair[1]));
    }

    let mut stmt = conn.prepare(
        "SELECT id FROM entities WHERE project_id = ?1 AND name_norm = ?2",
    )?;
    let mut seeds: Vec<String> = Vec::new();
    for name in candidates {
        let ids: Vec<String> = stmt
            .query_map(params![project_id, name], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for id in ids {
            if !seeds.contains(&id) {
                seeds.push(id);
            }
        }
    }
    Ok(seeds)
}

/// Walk the relation graph from seed entities and score reachable facts.
pub fn related_facts(
    conn: &Connection,
    project_id: &str,
    seeds: &[String],
    max_hops: u32,
) -> Result<Vec<GraphHit>> {
    let mut entity_scores: HashMap<String, f64> = HashMap::new();
    for seed in seeds {
        entity_scores.insert(seed.clone(), 1.0);
    }

    let mut neighbor_stmt = conn.prepare(
        "SELECT CASE WHEN src_entity_id = ?2 THEN dst_entity_id ELSE src_entity_id END, \
                SUM(weight) \
         FROM relations \
         WHERE project_id = ?1 AND (src_entity_id = ?2 OR dst_entity_id = ?2) \
         GROUP BY 1",
    )?;

    let mut frontier: Vec<String> = seeds.to_vec();
    for _hop in 0..max_hops {
        let mut next_frontier: Vec<String> = Vec::new();
        for entity_id in &frontier {
            let parent_score = entity_scores.get(entity_id).copied().unwrap_or(0.0);
            let neighbors: Vec<(String, f64)> = neighbor_stmt
                .query_map(params![project_id, entity_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (neighbor, weight) in neighbors {
                // Saturating weight factor keeps heavily reasserted edges
                // from dominating unboundedly
                let contribution = parent_score * HOP_DECAY * (weight / (weight + 1.0));
                let entry = entity_scores.entry(neighbor.clone()).or_insert(0.0);
                if *entry == 0.0 {
                    next_frontier.push(neighbor);
                }
                *entry += contribution;
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    // Project entity scores onto the facts that mention them
    let mut fact_stmt = conn.prepare(
        "SELECT fe.fact_id FROM fact_entities fe \
         JOIN facts f ON f.id = fe.fact_id \
         WHERE fe.entity_id = ?1 AND f.project_id = ?2",
    )?;
    let mut fact_scores: HashMap<String, f64> = HashMap::new();
    for (entity_id, score) in &entity_scores {
        let fact_ids: Vec<String> = fact_stmt
            .query_map(params![entity_id, project_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for fact_id in fact_ids {
            *fact_scores.entry(fact_id).or_insert(0.0) += score;
        }
    }

    let mut hits: Vec<GraphHit> = fact_scores
        .into_iter()
        .map(|(fact_id, score)| GraphHit { fact_id, score })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fact_id.cmp(&b.fact_id))
    });
    Ok(hits)
}
