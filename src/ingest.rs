//! The ingestion coordinator: transcript in, facts out.
//!
//! Orchestrates one extraction run end to end: resume from the session
//! marker, parse the new transcript suffix, extract candidates, and embed
//! them (with retry) — all before taking the per-session advisory lock. The
//! lock covers only the write phase: store each candidate through the
//! deduplicating write path, apply extractor-signaled supersessions, and
//! advance the marker only past content that was fully consumed. If another
//! writer moved the marker while we were embedding, the read phase is redone
//! under the lock. Running the same transcript twice adds nothing the second
//! time.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TacitConfig;
use crate::dedup::DedupThresholds;
use crate::embedding::EmbeddingProvider;
use crate::extract::{CandidateFact, FactExtractor};
use crate::store::facts::{self, NewFact, StoreOutcome};
use crate::store::types::RelationType;
use crate::store::{content_hash, entities, markers, normalize_name, relations};
use crate::transcript::parse_transcript;

/// Failure classes an extraction run can report.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Another extraction currently holds the lock for this session.
    #[error("session {session_id} is being ingested by another process")]
    Locked { session_id: String },
    /// A dependency (embedding endpoint, filesystem) failed even after
    /// retries; the run can be repeated later.
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    /// The store refused a write it should have accepted.
    #[error("store inconsistency: {0}")]
    Consistency(String),
    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Summary of one extraction run.
#[derive(Debug, Default, serde::Serialize)]
pub struct ExtractionReport {
    /// New fact rows written (including superseding and reinforcing ones).
    pub facts_added: usize,
    /// Prior facts marked superseded during this run.
    pub facts_superseded: usize,
    /// Facts stored as reinforcement of an existing cluster.
    pub facts_reinforced: usize,
    /// Candidates skipped because their exact text was already stored.
    pub skipped_duplicates: usize,
    pub warnings: Vec<String>,
}

/// Everything the read phase produced, ready to be written.
struct Prepared {
    raw: String,
    start: u64,
    committable: u64,
    warnings: Vec<String>,
    candidates: Vec<CandidateFact>,
    embeddings: Vec<Vec<f32>>,
}

/// Run extraction for one `(project, session, transcript)` triple.
pub fn extract_session(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    extractor: &dyn FactExtractor,
    transcript_path: &Path,
    project_id: &str,
    session_id: &str,
    config: &TacitConfig,
) -> Result<ExtractionReport, IngestError> {
    let prepared = prepare(conn, provider, extractor, transcript_path, project_id, session_id, config)?;

    let holder = format!("pid-{}", std::process::id());
    let acquired = markers::acquire_lock(
        conn,
        project_id,
        session_id,
        &holder,
        config.ingest.lock_stale_secs as u64,
    )?;
    if !acquired {
        return Err(IngestError::Locked {
            session_id: session_id.to_string(),
        });
    }

    let result = write_locked(
        conn,
        provider,
        extractor,
        transcript_path,
        project_id,
        session_id,
        config,
        prepared,
    );
    if let Err(e) = markers::release_lock(conn, project_id, session_id, &holder) {
        warn!(error = %e, "failed to release session lock");
    }
    result
}

/// The read phase: parse the unconsumed transcript suffix, extract
/// candidates, embed them. No writes, no lock held.
fn prepare(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    extractor: &dyn FactExtractor,
    transcript_path: &Path,
    project_id: &str,
    session_id: &str,
    config: &TacitConfig,
) -> Result<Prepared, IngestError> {
    let mut warnings = Vec::new();

    let raw = std::fs::read_to_string(transcript_path).map_err(|e| IngestError::Transient {
        attempts: 1,
        message: format!("cannot read transcript {}: {e}", transcript_path.display()),
    })?;

    let start = resume_offset(conn, project_id, session_id, &raw, &mut warnings)?;

    let parsed = parse_transcript(&raw, start);
    for w in &parsed.warnings {
        warnings.push(format!("offset {}: {}", w.offset, w.message));
    }
    debug!(
        events = parsed.events.len(),
        start, "parsed transcript suffix"
    );

    let candidates = extractor.extract(&parsed.events).map_err(|e| IngestError::Transient {
        attempts: 1,
        message: format!("extraction failed: {e}"),
    })?;

    let embeddings = if candidates.is_empty() {
        Vec::new()
    } else {
        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let embeddings =
            with_retry(config.ingest.max_retries, config.ingest.retry_base_ms, || {
                provider.embed_batch(&texts)
            })?;
        if embeddings.len() != candidates.len() {
            return Err(IngestError::Consistency(format!(
                "embedder returned {} vectors for {} candidates",
                embeddings.len(),
                candidates.len()
            )));
        }
        embeddings
    };

    Ok(Prepared {
        start,
        committable: parsed.committable_offset(),
        raw,
        warnings,
        candidates,
        embeddings,
    })
}

/// Where to resume reading: the stored marker if its consumed prefix is still
/// intact, otherwise zero (a rewritten or truncated transcript restarts).
fn resume_offset(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
    raw: &str,
    warnings: &mut Vec<String>,
) -> Result<u64, IngestError> {
    match markers::get_marker(conn, project_id, session_id)? {
        Some(marker) => match raw.get(..marker.last_offset as usize) {
            Some(prefix) if content_hash(prefix) == marker.prefix_hash => Ok(marker.last_offset),
            _ => {
                let msg = format!(
                    "transcript prefix changed since last run (marker at {}), re-reading from start",
                    marker.last_offset
                );
                warn!(project_id, session_id, "{msg}");
                warnings.push(msg);
                Ok(0)
            }
        },
        None => Ok(0),
    }
}

/// The write phase, run under the session lock.
#[allow(clippy::too_many_arguments)]
fn write_locked(
    conn: &mut Connection,
    provider: &dyn EmbeddingProvider,
    extractor: &dyn FactExtractor,
    transcript_path: &Path,
    project_id: &str,
    session_id: &str,
    config: &TacitConfig,
    mut prepared: Prepared,
) -> Result<ExtractionReport, IngestError> {
    // Another writer may have advanced the marker between our read phase and
    // lock acquisition; the prepared batch would overlap consumed content.
    // Redo the read phase now that the marker cannot move.
    let mut revalidate_warnings = Vec::new();
    let current = resume_offset(conn, project_id, session_id, &prepared.raw, &mut revalidate_warnings)?;
    if current != prepared.start {
        debug!(
            was = prepared.start,
            now = current,
            "marker moved during preparation, redoing read phase"
        );
        prepared = prepare(conn, provider, extractor, transcript_path, project_id, session_id, config)?;
    }

    let mut report = ExtractionReport {
        warnings: std::mem::take(&mut prepared.warnings),
        ..Default::default()
    };

    if prepared.candidates.is_empty() {
        advance(conn, project_id, session_id, &prepared.raw, prepared.committable)?;
        info!(project_id, session_id, "no new candidates");
        return Ok(report);
    }

    let thresholds = DedupThresholds {
        merge: config.retrieval.merge_threshold,
        reinforce: config.retrieval.reinforce_threshold,
    };

    let mut stored: Vec<Option<StoreOutcome>> = Vec::with_capacity(prepared.candidates.len());
    let mut first_failed_offset: Option<u64> = None;

    for (candidate, embedding) in prepared.candidates.iter().zip(prepared.embeddings.iter()) {
        let new_fact = NewFact {
            project_id,
            session_id,
            kind: candidate.kind,
            text: &candidate.text,
            confidence: candidate.confidence,
            entities: &candidate.entities,
            span_start: candidate.span_start,
            span_end: candidate.span_end,
        };
        match facts::store_fact(conn, &new_fact, embedding, &thresholds) {
            Ok(outcome) => {
                match &outcome {
                    StoreOutcome::Created { .. } => report.facts_added += 1,
                    StoreOutcome::Superseded { .. } => {
                        report.facts_added += 1;
                        report.facts_superseded += 1;
                    }
                    StoreOutcome::Reinforced { .. } => {
                        report.facts_added += 1;
                        report.facts_reinforced += 1;
                    }
                    StoreOutcome::DuplicateSkipped { .. } => report.skipped_duplicates += 1,
                }
                stored.push(Some(outcome));
            }
            Err(e) => {
                // Stop at the first failed write; the marker must not
                // advance past content that produced unstored candidates.
                warn!(error = %e, "storing fact failed, stopping run");
                report.warnings.push(format!("store failed: {e}"));
                first_failed_offset = Some(candidate.span_start);
                break;
            }
        }
    }

    apply_relation_hints(conn, project_id, &prepared.candidates, &stored, &mut report)?;

    let mut offset = prepared.committable;
    if let Some(failed) = first_failed_offset {
        offset = offset.min(failed);
    }
    advance(conn, project_id, session_id, &prepared.raw, offset)?;

    info!(
        project_id,
        session_id,
        added = report.facts_added,
        superseded = report.facts_superseded,
        reinforced = report.facts_reinforced,
        skipped = report.skipped_duplicates,
        "extraction run complete"
    );
    Ok(report)
}

/// Turn intra-batch relation hints into graph edges, and apply
/// extractor-signaled supersessions that the similarity gate did not already
/// catch.
fn apply_relation_hints(
    conn: &Connection,
    project_id: &str,
    candidates: &[CandidateFact],
    stored: &[Option<StoreOutcome>],
    report: &mut ExtractionReport,
) -> Result<(), IngestError> {
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(relation_type) = candidate.relation_type else {
            continue;
        };
        let Some(Some(outcome)) = stored.get(i) else {
            continue;
        };
        let new_id = outcome.fact_id().to_string();

        for &target in &candidate.related_to {
            let Some(Some(target_outcome)) = stored.get(target) else {
                continue;
            };
            let old_id = target_outcome.fact_id().to_string();
            if old_id == new_id {
                continue;
            }

            if relation_type == RelationType::Supersedes {
                // Both ends must still be live: a skipped-duplicate outcome
                // can resolve to a fact that was itself superseded meanwhile
                if is_live(conn, &old_id)? && is_live(conn, &new_id)? {
                    facts::supersede(conn, &old_id, &new_id)
                        .map_err(|e| IngestError::Consistency(e.to_string()))?;
                    report.facts_superseded += 1;
                }
            }

            if let Some((src, dst)) = primary_entities(conn, project_id, candidate, &candidates[target])? {
                relations::upsert_relation(conn, project_id, &src, &dst, relation_type, Some(&new_id))?;
            }
        }
    }
    Ok(())
}

fn is_live(conn: &Connection, fact_id: &str) -> Result<bool, IngestError> {
    Ok(facts::get_fact(conn, fact_id)?
        .map(|f| f.superseded_by.is_none())
        .unwrap_or(false))
}

/// Resolve the first entity mention of each candidate to stored entity IDs.
fn primary_entities(
    conn: &Connection,
    project_id: &str,
    a: &CandidateFact,
    b: &CandidateFact,
) -> Result<Option<(String, String)>, IngestError> {
    let resolve = |c: &CandidateFact| -> Result<Option<String>, IngestError> {
        let Some(mention) = c.entities.first() else {
            return Ok(None);
        };
        let entity = entities::find_by_norm(conn, project_id, &normalize_name(&mention.name))?;
        Ok(entity.map(|e| e.id))
    };
    match (resolve(a)?, resolve(b)?) {
        (Some(src), Some(dst)) if src != dst => Ok(Some((src, dst))),
        _ => Ok(None),
    }
}

fn advance(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
    raw: &str,
    offset: u64,
) -> Result<(), IngestError> {
    let prefix = raw.get(..offset as usize).ok_or_else(|| {
        IngestError::Consistency(format!("marker offset {offset} is not a line boundary"))
    })?;
    markers::advance_marker(conn, project_id, session_id, offset, &content_hash(prefix))?;
    Ok(())
}

fn with_retry<T>(
    max_retries: u32,
    base_ms: u64,
    mut op: impl FnMut() -> anyhow::Result<T>,
) -> Result<T, IngestError> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                let backoff = Duration::from_millis(base_ms << attempt);
                warn!(error = %e, attempt, "retrying after backoff");
                std::thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => {
                return Err(IngestError::Transient {
                    attempts: attempt + 1,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retry(3, 1, || {
            calls += 1;
            if calls < 3 {
                anyhow::bail!("flaky")
            }
            Ok(42)
        })
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_gives_up_after_budget() {
        let mut calls = 0;
        let err = with_retry(2, 1, || -> anyhow::Result<()> {
            calls += 1;
            anyhow::bail!("down")
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        let IngestError::Transient { attempts, .. } = err else {
            panic!("expected Transient, got {err:?}")
        };
        assert_eq!(attempts, 3);
    }
}
