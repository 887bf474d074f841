//! Context injection: render stored knowledge as a markdown block.
//!
//! Without a query, renders the most recent live high-value facts (decisions,
//! constraints, patterns, corrections) grouped by kind, for prepending to a
//! fresh session. With a query, runs a recall and renders the hits. Produces
//! an empty string when there is nothing worth injecting.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::retrieval;
use crate::store::types::FactKind;

const HEADER: &str = "# Knowledge from previous sessions";

fn section_title(kind: FactKind) -> &'static str {
    match kind {
        FactKind::Decision => "## Decisions",
        FactKind::Constraint => "## Constraints",
        FactKind::Pattern => "## Patterns",
        FactKind::Correction => "## Corrections",
        FactKind::Fact => "## Facts",
    }
}

/// Render recent high-value facts for session startup.
pub fn inject_recent(conn: &Connection, project_id: &str, limit: usize) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT kind, text FROM facts \
         WHERE project_id = ?1 AND superseded_by IS NULL \
         AND kind IN ('decision','constraint','pattern','correction') \
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map(params![project_id, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(render(&rows))
}

/// Render the results of a recall for a specific query.
pub fn inject_query(
    conn: &Connection,
    provider: &dyn EmbeddingProvider,
    project_id: &str,
    query: &str,
    k: usize,
    config: &RetrievalConfig,
) -> Result<String> {
    let response = retrieval::recall(conn, provider, project_id, query, k, config)?;
    let rows: Vec<(String, String)> = response
        .hits
        .into_iter()
        .map(|hit| (hit.fact.kind, hit.fact.text))
        .collect();
    Ok(render(&rows))
}

/// Group (kind, text) rows into sections, kinds in injection-priority order.
fn render(rows: &[(String, String)]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut out = String::from(HEADER);
    for kind in FactKind::all() {
        let bullets: Vec<&str> = rows
            .iter()
            .filter(|(k, _)| k == kind.as_str())
            .map(|(_, text)| text.as_str())
            .collect();
        if bullets.is_empty() {
            continue;
        }
        out.push_str("\n\n");
        out.push_str(section_title(kind));
        for text in bullets {
            out.push_str("\n- ");
            out.push_str(text);
        }
    }
    out.push('\n');
    out
}
