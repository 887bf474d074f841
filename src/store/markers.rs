//! Session markers and advisory per-session locks.
//!
//! A marker records how far into a transcript extraction has committed
//! (`last_offset`) together with a hash of the consumed prefix, so a
//! truncated or rewritten transcript is detected instead of silently
//! re-ingested from a stale offset. Locks are advisory rows: concurrent
//! extraction of the same `(project, session)` is rejected, and a lock left
//! behind by a crashed run is broken once it goes stale.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMarker {
    /// Byte offset up to which the transcript has been consumed.
    pub last_offset: u64,
    /// Content hash of the transcript bytes before `last_offset`.
    pub prefix_hash: String,
}

pub fn get_marker(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
) -> Result<Option<SessionMarker>> {
    let marker = conn
        .query_row(
            "SELECT last_offset, prefix_hash FROM session_markers \
             WHERE project_id = ?1 AND session_id = ?2",
            params![project_id, session_id],
            |row| {
                Ok(SessionMarker {
                    last_offset: row.get::<_, i64>(0)? as u64,
                    prefix_hash: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(marker)
}

pub fn advance_marker(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
    offset: u64,
    prefix_hash: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO session_markers (project_id, session_id, last_offset, prefix_hash, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(project_id, session_id) DO UPDATE SET \
         last_offset = excluded.last_offset, prefix_hash = excluded.prefix_hash, \
         updated_at = excluded.updated_at",
        params![project_id, session_id, offset as i64, prefix_hash, now],
    )?;
    Ok(())
}

/// Try to take the advisory lock for `(project, session)`.
///
/// Returns `false` if another holder currently has it. A lock older than
/// `stale_secs` is treated as abandoned and taken over.
pub fn acquire_lock(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
    holder: &str,
    stale_secs: u64,
) -> Result<bool> {
    let now = Utc::now();

    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT holder, acquired_at FROM session_locks \
             WHERE project_id = ?1 AND session_id = ?2",
            params![project_id, session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((current_holder, acquired_at)) = current {
        let stale = DateTime::parse_from_rfc3339(&acquired_at)
            .map(|t| now.signed_duration_since(t.with_timezone(&Utc)).num_seconds() as i64)
            .map(|age| age >= stale_secs as i64)
            .unwrap_or(true);
        if !stale && current_holder != holder {
            return Ok(false);
        }
        if stale {
            tracing::warn!(
                project_id,
                session_id,
                holder = %current_holder,
                "breaking stale session lock"
            );
        }
        conn.execute(
            "UPDATE session_locks SET holder = ?3, acquired_at = ?4 \
             WHERE project_id = ?1 AND session_id = ?2",
            params![project_id, session_id, holder, now.to_rfc3339()],
        )?;
        return Ok(true);
    }

    conn.execute(
        "INSERT INTO session_locks (project_id, session_id, holder, acquired_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![project_id, session_id, holder, now.to_rfc3339()],
    )?;
    Ok(true)
}

/// Release the lock if this holder still owns it.
pub fn release_lock(
    conn: &Connection,
    project_id: &str,
    session_id: &str,
    holder: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM session_locks WHERE project_id = ?1 AND session_id = ?2 AND holder = ?3",
        params![project_id, session_id, holder],
    )?;
    Ok(())
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
    fn marker_upsert_and_read_back() {
        let conn = test_conn();
        assert!(get_marker(&conn, "p", "s").unwrap().is_none());

        advance_marker(&conn, "p", "s", 120, "abc").unwrap();
        advance_marker(&conn, "p", "s", 300, "def").unwrap();

        let marker = get_marker(&conn, "p", "s").unwrap().unwrap();
        assert_eq!(marker.last_offset, 300);
        assert_eq!(marker.prefix_hash, "def");
    }

    #[test]
    fn markers_are_scoped_per_project_and_session() {
        let conn = test_conn();
        advance_marker(&conn, "p1", "s", 10, "a").unwrap();
        advance_marker(&conn, "p2", "s", 20, "b").unwrap();
        advance_marker(&conn, "p1", "t", 30, "c").unwrap();

        assert_eq!(get_marker(&conn, "p1", "s").unwrap().unwrap().last_offset, 10);
        assert_eq!(get_marker(&conn, "p2", "s").unwrap().unwrap().last_offset, 20);
        assert_eq!(get_marker(&conn, "p1", "t").unwrap().unwrap().last_offset, 30);
    }

    #[test]
    fn second_holder_is_rejected_until_release() {
        let conn = test_conn();
        assert!(acquire_lock(&conn, "p", "s", "pid-1", 600).unwrap());
        assert!(!acquire_lock(&conn, "p", "s", "pid-2", 600).unwrap());
        // Re-entrant for the same holder
        assert!(acquire_lock(&conn, "p", "s", "pid-1", 600).unwrap());

        release_lock(&conn, "p", "s", "pid-1").unwrap();
        assert!(acquire_lock(&conn, "p", "s", "pid-2", 600).unwrap());
    }

    #[test]
    fn stale_lock_is_broken() {
        let conn = test_conn();
        assert!(acquire_lock(&conn, "p", "s", "pid-1", 600).unwrap());

        // Backdate the lock past the staleness horizon
        let old = (Utc::now() - chrono::Duration::seconds(700)).to_rfc3339();
        conn.execute(
            "UPDATE session_locks SET acquired_at = ?1 WHERE project_id = 'p'",
            params![old],
        )
        .unwrap();

        assert!(acquire_lock(&conn, "p", "s", "pid-2", 600).unwrap());
    }

    #[test]
    fn release_by_non_holder_is_a_no_op() {
        let conn = test_conn();
        assert!(acquire_lock(&conn, "p", "s", "pid-1", 600).unwrap());
        release_lock(&conn, "p", "s", "pid-2").unwrap();
        assert!(!acquire_lock(&conn, "p", "s", "pid-3", 600).unwrap());
    }
}
