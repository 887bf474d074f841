//! Entity upserts and lookups.
//!
//! Entities are keyed by `(project_id, name_norm, kind)`; repeated mention of
//! the same name (modulo case and whitespace) resolves to the same row and
//! bumps its mention count.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::normalize_name;
use super::types::{Entity, EntityKind};

/// Insert or reinforce an entity, returning its ID.
pub fn upsert_entity(
    conn: &Connection,
    project_id: &str,
    name: &str,
    kind: EntityKind,
) -> Result<String> {
    let name_norm = normalize_name(name);
    anyhow::ensure!(!name_norm.is_empty(), "entity name is empty");
    let now = Utc::now().to_rfc3339();

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM entities WHERE project_id = ?1 AND name_norm = ?2 AND kind = ?3",
            params![project_id, name_norm, kind.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE entities SET mention_count = mention_count + 1, last_seen = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        return Ok(id);
    }

    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO entities (id, project_id, name, name_norm, kind, mention_count, first_seen, last_seen) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![id, project_id, name.trim(), name_norm, kind.as_str(), now],
    )?;
    Ok(id)
}

/// Look up an entity by normalized name, any kind. Returns the most-mentioned
/// match when several kinds share a name.
pub fn find_by_norm(conn: &Connection, project_id: &str, name_norm: &str) -> Result<Option<Entity>> {
    let entity = conn
        .query_row(
            "SELECT id, project_id, name, name_norm, kind, mention_count \
             FROM entities WHERE project_id = ?1 AND name_norm = ?2 \
             ORDER BY mention_count DESC LIMIT 1",
            params![project_id, name_norm],
            entity_from_row,
        )
        .optional()?;
    Ok(entity)
}

/// Link a fact to an entity it mentions.
pub fn link_fact(conn: &Connection, fact_id: &str, entity_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO fact_entities (fact_id, entity_id) VALUES (?1, ?2)",
        params![fact_id, entity_id],
    )?;
    Ok(())
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        name_norm: row.get(3)?,
        kind: row.get(4)?,
        mention_count: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn repeated_mention_resolves_to_same_entity() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p", "Deploy  Script", EntityKind::Concept).unwrap();
        let b = upsert_entity(&conn, "p", "deploy script", EntityKind::Concept).unwrap();
        assert_eq!(a, b);

        let entity = find_by_norm(&conn, "p", "deploy script").unwrap().unwrap();
        assert_eq!(entity.mention_count, 2);
        // Display name is the first-seen form
        assert_eq!(entity.name, "Deploy  Script".trim());
    }

    #[test]
    fn same_name_different_project_is_distinct() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p1", "redis", EntityKind::Tool).unwrap();
        let b = upsert_entity(&conn, "p2", "redis", EntityKind::Tool).unwrap();
        assert_ne!(a, b);
        assert!(find_by_norm(&conn, "p3", "redis").unwrap().is_none());
    }

    #[test]
    fn same_name_different_kind_is_distinct() {
        let conn = test_conn();
        let a = upsert_entity(&conn, "p", "cargo", EntityKind::Tool).unwrap();
        let b = upsert_entity(&conn, "p", "cargo", EntityKind::Concept).unwrap();
        assert_ne!(a, b);
    }
}
