//! Entity-to-entity graph edges.
//!
//! Edges are typed and weighted; asserting the same edge again bumps its
//! weight instead of duplicating the row. Both endpoints must belong to the
//! edge's project — cross-project references are rejected, not silently
//! stored.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::RelationType;

/// Insert or reinforce an edge, returning its ID.
pub fn upsert_relation(
    conn: &Connection,
    project_id: &str,
    src_entity_id: &str,
    dst_entity_id: &str,
    relation_type: RelationType,
    source_fact_id: Option<&str>,
) -> Result<String> {
    for entity_id in [src_entity_id, dst_entity_id] {
        let owner: Option<String> = conn
            .query_row(
                "SELECT project_id FROM entities WHERE id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => bail!("relation references unknown entity {entity_id}"),
            Some(owner) if owner != project_id => {
                bail!("relation references entity {entity_id} from another project")
            }
            Some(_) => {}
        }
    }

    let now = Utc::now().to_rfc3339();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM relations WHERE project_id = ?1 AND src_entity_id = ?2 \
             AND dst_entity_id = ?3 AND relation_type = ?4",
            params![project_id, src_entity_id, dst_entity_id, relation_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE relations SET weight = weight + 1.0, last_seen = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        return Ok(id);
    }

    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO relations (id, project_id, src_entity_id, dst_entity_id, relation_type, \
         weight, source_fact_id, created_at, last_seen) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1.0, ?6, ?7, ?7)",
        params![
            id,
            project_id,
            src_entity_id,
            dst_entity_id,
            relation_type.as_str(),
            source_fact_id,
            now
        ],
    )?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entities::upsert_entity;
    use crate::store::types::EntityKind;

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn repeated_assertion_bumps_weight() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p", "api", EntityKind::Concept).unwrap();
        let b = upsert_entity(&conn, "p", "redis", EntityKind::Tool).unwrap();

        let r1 = upsert_relation(&conn, "p", &a, &b, RelationType::DependsOn, None).unwrap();
        let r2 = upsert_relation(&conn, "p", &a, &b, RelationType::DependsOn, None).unwrap();
        assert_eq!(r1, r2);

        let weight: f64 = conn
            .query_row("SELECT weight FROM relations WHERE id = ?1", params![r1], |r| r.get(0))
            .unwrap();
        assert_eq!(weight, 2.0);
    }

    #[test]
    fn distinct_types_are_distinct_edges() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p", "api", EntityKind::Concept).unwrap();
        let b = upsert_entity(&conn, "p", "redis", EntityKind::Tool).unwrap();

        let r1 = upsert_relation(&conn, "p", &a, &b, RelationType::DependsOn, None).unwrap();
        let r2 = upsert_relation(&conn, "p", &a, &b, RelationType::Mentions, None).unwrap();
        assert_ne!(r1, r2);
    }

    #[test]
    fn cross_project_endpoint_rejected() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p1", "api", EntityKind::Concept).unwrap();
        let b = upsert_entity(&conn, "p2", "redis", EntityKind::Tool).unwrap();

        assert!(upsert_relation(&conn, "p1", &a, &b, RelationType::DependsOn, None).is_err());
        assert!(upsert_relation(&conn, "p1", &a, "nope", RelationType::DependsOn, None).is_err());
    }
}
