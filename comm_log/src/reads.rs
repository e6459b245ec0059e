use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::events::ensure_log;
use crate::model::now_millis;

/// Record that `user_id` has read an event of the project's log.
///
/// The receipt table's primary key makes this a set union: a second mark by
/// the same user is ignored, marks by different users all survive. Returns
/// whether a new receipt was written.
pub fn mark_read(
    conn: &mut Connection,
    project_id: &Uuid,
    event_id: &Uuid,
    user_id: &Uuid,
) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_log(&tx, project_id)?;
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM events WHERE id = ?1 AND project_id = ?2",
            params![event_id.to_string(), project_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(LogError::EventNotFound(*event_id));
    }
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO read_receipts (event_id, user_id, read_at) VALUES (?1, ?2, ?3)",
        params![event_id.to_string(), user_id.to_string(), now_millis()],
    )?;
    tx.commit()?;
    Ok(inserted == 1)
}

/// Count chat messages in a project's log the user has not marked read.
/// The user's own messages are included.
pub fn unread_count(conn: &Connection, project_id: &Uuid, user_id: &Uuid) -> Result<u64> {
    ensure_log(conn, project_id)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events e WHERE e.project_id = ?1 AND e.kind = 'message' \
         AND NOT EXISTS (SELECT 1 FROM read_receipts r WHERE r.event_id = e.id AND r.user_id = ?2)",
        params![project_id.to_string(), user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewEvent;
    use crate::{db, events};

    #[test]
    fn unread_math() {
        let tmp = tempfile::tempdir().unwrap();
        let mut conn = db::init_db(tmp.path().join("log.db")).unwrap();
        let project = Uuid::new_v4();
        events::create_log(&conn, &project).unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let m1 = events::append_event(&mut conn, &project, NewEvent::message("m1", a)).unwrap();
        events::append_event(&mut conn, &project, NewEvent::status_update("s", a)).unwrap();
        let m2 = events::append_event(&mut conn, &project, NewEvent::message("m2", b)).unwrap();
        assert_eq!(unread_count(&conn, &project, &a).unwrap(), 2);
        assert_eq!(unread_count(&conn, &project, &b).unwrap(), 2);

        assert!(mark_read(&mut conn, &project, &m2.id, &a).unwrap());
        assert!(!mark_read(&mut conn, &project, &m2.id, &a).unwrap());
        assert_eq!(unread_count(&conn, &project, &a).unwrap(), 1);
        mark_read(&mut conn, &project, &m1.id, &b).unwrap();
        mark_read(&mut conn, &project, &m2.id, &b).unwrap();
        assert_eq!(unread_count(&conn, &project, &b).unwrap(), 0);

        let stored = events::get_event(&conn, &project, &m2.id).unwrap();
        let readers: Vec<_> = stored.read_by.iter().map(|r| r.user_id).collect();
        assert_eq!(readers, [a, b]);
    }

    #[test]
    fn unknown_event_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mut conn = db::init_db(tmp.path().join("log.db")).unwrap();
        let project = Uuid::new_v4();
        events::create_log(&conn, &project).unwrap();
        let err = mark_read(&mut conn, &project, &Uuid::new_v4(), &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LogError::EventNotFound(_)));
    }
}
