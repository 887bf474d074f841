//! Fact persistence: the single write path into the hybrid store.
//!
//! [`store_fact`] runs exact-hash dedup, semantic dedup classification, and
//! the resulting insert plus supersession or reinforcement side effects in
//! one transaction across `facts`, `facts_fts`, `facts_vec`, the entity
//! tables, and the audit log. Either every index sees the fact or none does.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use super::types::{Fact, FactKind};
use super::{content_hash, embedding_to_bytes, normalize_name};
use crate::dedup::{self, DedupDecision, DedupThresholds};
use crate::extract::EntityMention;

/// Confidence multiplier for facts stored as reinforcement of a prior.
const REINFORCE_DISCOUNT: f64 = 0.6;
/// Confidence added to the prior when it gets reinforced.
const REINFORCE_BUMP: f64 = 0.1;

/// Input to [`store_fact`].
#[derive(Debug)]
pub struct NewFact<'a> {
    pub project_id: &'a str,
    pub session_id: &'a str,
    pub kind: FactKind,
    pub text: &'a str,
    pub confidence: f64,
    pub entities: &'a [EntityMention],
    pub span_start: u64,
    pub span_end: u64,
}

/// What happened to a candidate fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Stored as new knowledge.
    Created { id: String },
    /// Stored, and `superseded` was marked replaced by it.
    Superseded { id: String, superseded: String },
    /// Stored as reinforcement of `reinforces`.
    Reinforced { id: String, reinforces: String },
    /// Byte-identical text already stored for this project; nothing inserted.
    DuplicateSkipped { existing: String },
}

impl StoreOutcome {
    /// ID of the live fact representing this knowledge after the write.
    pub fn fact_id(&self) -> &str {
        match self {
            Self::Created { id }
            | Self::Superseded { id, .. }
            | Self::Reinforced { id, .. }
            | Self::DuplicateSkipped { existing: id } => id,
        }
    }
}

/// Store one candidate fact, deciding create/supersede/reinforce/skip.
pub fn store_fact(
    conn: &mut Connection,
    fact: &NewFact<'_>,
    embedding: &[f32],
    thresholds: &DedupThresholds,
) -> Result<StoreOutcome> {
    let tx = conn.transaction()?;
    let outcome = store_fact_tx(&tx, fact, embedding, thresholds)?;
    tx.commit()?;
    Ok(outcome)
}

fn store_fact_tx(
    tx: &Transaction<'_>,
    fact: &NewFact<'_>,
    embedding: &[f32],
    thresholds: &DedupThresholds,
) -> Result<StoreOutcome> {
    let text_hash = content_hash(fact.text);
    let now = Utc::now().to_rfc3339();

    // Exact duplicate: same bytes already stored for this project. Touch it
    // so repeated restatement keeps it warm, insert nothing.
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM facts WHERE project_id = ?1 AND text_hash = ?2",
            params![fact.project_id, text_hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing) = existing {
        tx.execute(
            "UPDATE facts SET updated_at = ?1 WHERE id = ?2",
            params![now, existing],
        )?;
        return Ok(StoreOutcome::DuplicateSkipped { existing });
    }

    let entity_norms: Vec<String> = fact
        .entities
        .iter()
        .map(|e| normalize_name(&e.name))
        .collect();
    let decision = dedup::classify(tx, fact.project_id, embedding, &entity_norms, thresholds)?;

    let id = Uuid::now_v7().to_string();
    let reinforces = match &decision {
        DedupDecision::Reinforce { prior_id } => Some(prior_id.clone()),
        _ => None,
    };
    let confidence = match &decision {
        DedupDecision::Reinforce { .. } => {
            (fact.confidence * REINFORCE_DISCOUNT).clamp(0.0, 1.0)
        }
        _ => fact.confidence.clamp(0.0, 1.0),
    };

    tx.execute(
        "INSERT INTO facts (id, project_id, source_session_id, kind, text, text_hash, \
         confidence, span_start, span_end, created_at, updated_at, reinforces) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11)",
        params![
            id,
            fact.project_id,
            fact.session_id,
            fact.kind.as_str(),
            fact.text,
            text_hash,
            confidence,
            fact.span_start as i64,
            fact.span_end as i64,
            now,
            reinforces,
        ],
    )?;

    // FTS shadow row shares the rowid of the base row
    let rowid: i64 = tx.query_row(
        "SELECT rowid FROM facts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO facts_fts (rowid, text, id, project_id) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, fact.text, id, fact.project_id],
    )?;
    tx.execute(
        "INSERT INTO facts_vec (id, project_id, embedding) VALUES (?1, ?2, ?3)",
        params![id, fact.project_id, embedding_to_bytes(embedding)],
    )?;

    for mention in fact.entities {
        let entity_id =
            super::entities::upsert_entity(tx, fact.project_id, &mention.name, mention.kind)?;
        super::entities::link_fact(tx, &id, &entity_id)?;
    }
    link_comentions(tx, fact.project_id, &id)?;

    audit(tx, "create", &id, None)?;

    match decision {
        DedupDecision::New => Ok(StoreOutcome::Created { id }),
        DedupDecision::Update { prior_id } => {
            supersede_tx(tx, &prior_id, &id)?;
            Ok(StoreOutcome::Superseded {
                id,
                superseded: prior_id,
            })
        }
        DedupDecision::Reinforce { prior_id } => {
            tx.execute(
                "UPDATE facts SET confidence = MIN(1.0, confidence + ?1), updated_at = ?2 \
                 WHERE id = ?3",
                params![REINFORCE_BUMP, now, prior_id],
            )?;
            audit(tx, "reinforce", &prior_id, Some(&id))?;
            Ok(StoreOutcome::Reinforced {
                id,
                reinforces: prior_id,
            })
        }
    }
}

/// Entities co-mentioned by one fact get pairwise `mentions` edges, anchored
/// on the first entity so the edge count stays linear in the mention list.
fn link_comentions(tx: &Transaction<'_>, project_id: &str, fact_id: &str) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT entity_id FROM fact_entities WHERE fact_id = ?1 ORDER BY entity_id",
    )?;
    let entity_ids: Vec<String> = stmt
        .query_map(params![fact_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some((anchor, rest)) = entity_ids.split_first() {
        for other in rest {
            super::relations::upsert_relation(
                tx,
                project_id,
                anchor,
                other,
                super::types::RelationType::Mentions,
                Some(fact_id),
            )?;
        }
    }
    Ok(())
}

/// Mark `old_id` superseded by `new_id`. Fails if the old fact is missing,
/// already superseded, or if the link would make the new fact supersede
/// itself. The replacement must itself be live: a superseded fact can never
/// become someone's successor, which keeps every `superseded_by` chain
/// acyclic.
pub fn supersede(conn: &Connection, old_id: &str, new_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    anyhow::ensure!(old_id != new_id, "fact cannot supersede itself");
    let replacement: Option<Option<String>> = conn
        .query_row(
            "SELECT superseded_by FROM facts WHERE id = ?1",
            params![new_id],
            |row| row.get(0),
        )
        .optional()?;
    match replacement {
        None => anyhow::bail!("replacement fact {new_id} not found"),
        Some(Some(_)) => {
            anyhow::bail!("replacement fact {new_id} is itself superseded")
        }
        Some(None) => {}
    }
    let rows = conn.execute(
        "UPDATE facts SET superseded_by = ?1, updated_at = ?2 \
         WHERE id = ?3 AND superseded_by IS NULL",
        params![new_id, now, old_id],
    )?;
    anyhow::ensure!(rows == 1, "fact {old_id} not found or already superseded");
    audit_conn(conn, "supersede", old_id, Some(new_id))?;
    Ok(())
}

fn supersede_tx(tx: &Transaction<'_>, old_id: &str, new_id: &str) -> Result<()> {
    supersede(tx, old_id, new_id)
}

/// Fetch a fact by ID.
pub fn get_fact(conn: &Connection, fact_id: &str) -> Result<Option<Fact>> {
    let fact = conn
        .query_row(
            &format!("{FACT_COLUMNS} WHERE id = ?1"),
            params![fact_id],
            fact_from_row,
        )
        .optional()?;
    Ok(fact)
}

/// Live (non-superseded) facts for a project, newest first.
pub fn live_facts(conn: &Connection, project_id: &str, limit: usize) -> Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "{FACT_COLUMNS} WHERE project_id = ?1 AND superseded_by IS NULL \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let facts = stmt
        .query_map(params![project_id, limit as i64], fact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}

/// Record that facts were returned by retrieval.
pub fn bump_access(conn: &Connection, fact_ids: &[String]) -> Result<()> {
    let mut stmt =
        conn.prepare("UPDATE facts SET access_count = access_count + 1 WHERE id = ?1")?;
    for id in fact_ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}

/// Stored embedding for a fact, if present.
pub fn get_embedding(conn: &Connection, fact_id: &str) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM facts_vec WHERE id = ?1",
            params![fact_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(blob.map(|b| super::bytes_to_embedding(&b)))
}

const FACT_COLUMNS: &str = "SELECT id, project_id, source_session_id, kind, text, confidence, \
     access_count, span_start, span_end, created_at, updated_at, superseded_by, reinforces \
     FROM facts";

pub(crate) fn fact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get(0)?,
        project_id: row.get(1)?,
        source_session_id: row.get(2)?,
        kind: row.get(3)?,
        text: row.get(4)?,
        confidence: row.get(5)?,
        access_count: row.get(6)?,
        span_start: row.get::<_, i64>(7)? as u64,
        span_end: row.get::<_, i64>(8)? as u64,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        superseded_by: row.get(11)?,
        reinforces: row.get(12)?,
    })
}

fn audit(tx: &Transaction<'_>, operation: &str, fact_id: &str, other: Option<&str>) -> Result<()> {
    audit_conn(tx, operation, fact_id, other)
}

fn audit_conn(
    conn: &Connection,
    operation: &str,
    fact_id: &str,
    other: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ingest_log (operation, fact_id, details, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![operation, fact_id, other, Utc::now().to_rfc3339()],
    )
    .context("failed to write audit log")?;
    Ok(())
}
