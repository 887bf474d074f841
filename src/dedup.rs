//! Duplicate detection for incoming facts and near-duplicate suppression for
//! outgoing results.
//!
//! The same fact gets restated every session, so duplication is cheap to
//! create and expensive to let accumulate. Incoming candidates are classified
//! against the live facts within a coarse vector radius ([`classify`]);
//! outgoing result lists get a Maximal-Marginal-Relevance-style pass
//! ([`mmr_keep_indices`]) so one underlying fact never surfaces twice under
//! two phrasings.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{cosine_similarity, embedding_to_bytes, l2_to_cosine};

/// Similarity thresholds governing classification.
#[derive(Debug, Clone, Copy)]
pub struct DedupThresholds {
    /// At or above: new fact supersedes the prior (given shared entities).
    pub merge: f64,
    /// At or above (but below merge): new fact reinforces the prior cluster.
    pub reinforce: f64,
}

/// What to do with a new candidate fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// Genuinely new knowledge — a new cluster.
    New,
    /// The candidate restates `prior_id` with updated content: store it and
    /// mark the prior superseded.
    Update { prior_id: String },
    /// The candidate adds confidence to the cluster around `prior_id`: store
    /// it with a discounted rank contribution.
    Reinforce { prior_id: String },
}

/// How many nearest neighbors to consider as the coarse candidate radius.
const CANDIDATE_RADIUS: usize = 20;

/// Classify a new candidate against existing live facts of the same project.
///
/// `entity_norms` are the normalized entity names the candidate mentions.
/// "Same primary entity references" is read as non-empty overlap, or both
/// sides mentioning no entities at all; high similarity without shared
/// entities downgrades to reinforcement.
pub fn classify(
    conn: &Connection,
    project_id: &str,
    embedding: &[f32],
    entity_norms: &[String],
    thresholds: &DedupThresholds,
) -> Result<DedupDecision> {
    let embedding_bytes = embedding_to_bytes(embedding);

    // The partition constraint keeps the radius within the project: a dense
    // cluster in another project must not evict the real neighbor from the
    // top-N.
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM facts_vec WHERE embedding MATCH ?1 \
         AND project_id = ?2 ORDER BY distance LIMIT ?3",
    )?;
    let neighbors: Vec<(String, f64)> = stmt
        .query_map(
            params![embedding_bytes, project_id, CANDIDATE_RADIUS as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut best_reinforce: Option<(String, f64)> = None;

    for (fact_id, distance) in neighbors {
        let similarity = l2_to_cosine(distance);
        // Ordered by distance: once below the band, nothing closer follows.
        if similarity < thresholds.reinforce {
            break;
        }

        // Only live facts of the same project participate.
        let live: Option<String> = conn
            .query_row(
                "SELECT id FROM facts WHERE id = ?1 AND project_id = ?2 \
                 AND superseded_by IS NULL",
                params![fact_id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(fact_id) = live else { continue };

        if similarity >= thresholds.merge && entities_overlap(conn, &fact_id, entity_norms)? {
            return Ok(DedupDecision::Update { prior_id: fact_id });
        }

        if best_reinforce
            .as_ref()
            .map(|(_, s)| similarity > *s)
            .unwrap_or(true)
        {
            best_reinforce = Some((fact_id, similarity));
        }
    }

    Ok(match best_reinforce {
        Some((prior_id, _)) => DedupDecision::Reinforce { prior_id },
        None => DedupDecision::New,
    })
}

/// Does the stored fact share an entity reference with the candidate?
/// Facts with no entity references on either side count as overlapping.
fn entities_overlap(conn: &Connection, fact_id: &str, entity_norms: &[String]) -> Result<bool> {
    let mut stmt = conn.prepare(
        "SELECT e.name_norm FROM fact_entities fe \
         JOIN entities e ON e.id = fe.entity_id WHERE fe.fact_id = ?1",
    )?;
    let existing: Vec<String> = stmt
        .query_map(params![fact_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    if existing.is_empty() && entity_norms.is_empty() {
        return Ok(true);
    }
    Ok(existing.iter().any(|norm| entity_norms.contains(norm)))
}

/// MMR-style near-duplicate suppression over a ranked candidate list.
///
/// `embeddings[i]` is the embedding of the i-th candidate (best first); items
/// without a stored embedding are always kept. Returns the indices to keep,
/// in rank order: among pairwise-similar candidates only the highest-ranked
/// representative survives.
pub fn mmr_keep_indices(embeddings: &[Option<Vec<f32>>], threshold: f64) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (i, candidate) in embeddings.iter().enumerate() {
        let Some(candidate) = candidate else {
            kept.push(i);
            continue;
        };
        let duplicate = kept.iter().any(|&j| {
            embeddings[j]
                .as_ref()
                .map(|kept_emb| cosine_similarity(candidate, kept_emb) >= threshold)
                .unwrap_or(false)
        });
        if !duplicate {
            kept.push(i);
        }
    }
    kept
}
