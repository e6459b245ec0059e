use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::model::{now_millis, Event, EventKind, MessagePage, NewEvent, PageRequest, ReadReceipt, Summary};

const EVENT_COLUMNS: &str = "id, seq, kind, content, author_id, created_at";

/// Register an empty log for a project. Registering twice is harmless.
pub fn create_log(conn: &Connection, project_id: &Uuid) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO logs (project_id, created_at) VALUES (?1, ?2)",
        params![project_id.to_string(), now_millis()],
    )?;
    Ok(())
}

/// Drop a log together with all of its events and receipts.
pub fn delete_log(conn: &Connection, project_id: &Uuid) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM logs WHERE project_id = ?1",
        [project_id.to_string()],
    )?;
    if removed == 0 {
        return Err(LogError::LogNotFound(*project_id));
    }
    Ok(())
}

pub(crate) fn ensure_log(conn: &Connection, project_id: &Uuid) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM logs WHERE project_id = ?1",
            [project_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(LogError::LogNotFound(*project_id)),
    }
}

/// Append an event at the end of a project's log.
///
/// Position assignment and insert run in one IMMEDIATE transaction, so two
/// writers on the same database can never observe the same tail.
pub fn append_event(conn: &mut Connection, project_id: &Uuid, new: NewEvent) -> Result<Event> {
    let new = new.validate()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_log(&tx, project_id)?;
    let (last_seq, last_at): (Option<i64>, Option<i64>) = tx.query_row(
        "SELECT MAX(seq), MAX(created_at) FROM events WHERE project_id = ?1",
        [project_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let seq = last_seq.unwrap_or(0) + 1;
    let created_at = match last_at {
        Some(last) => now_millis().max(last),
        None => now_millis(),
    };
    let id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO events (id, project_id, seq, kind, content, author_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.to_string(),
            project_id.to_string(),
            seq,
            new.kind.as_str(),
            new.content,
            new.author_id.to_string(),
            created_at
        ],
    )?;
    for (position, reference) in new.attachments.iter().enumerate() {
        tx.execute(
            "INSERT INTO attachments (event_id, position, reference) VALUES (?1, ?2, ?3)",
            params![id.to_string(), position as i64, reference],
        )?;
    }
    tx.commit()?;
    Ok(Event {
        id,
        seq,
        kind: new.kind,
        content: new.content,
        author_id: new.author_id,
        attachments: new.attachments,
        created_at,
        read_by: Vec::new(),
    })
}

/// Fetch one event of a project's log with its attachments and receipts.
pub fn get_event(conn: &Connection, project_id: &Uuid, event_id: &Uuid) -> Result<Event> {
    ensure_log(conn, project_id)?;
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND project_id = ?2");
    let event = conn
        .query_row(
            &sql,
            params![event_id.to_string(), project_id.to_string()],
            row_to_event,
        )
        .optional()?;
    let mut event = event.ok_or(LogError::EventNotFound(*event_id))?;
    hydrate(conn, std::slice::from_mut(&mut event))?;
    Ok(event)
}

/// List one page of chat messages, newest page first, oldest first within
/// the page.
///
/// The count and the page are read inside one transaction so `has_more`
/// agrees with the rows returned.
pub fn list_messages(
    conn: &mut Connection,
    project_id: &Uuid,
    request: PageRequest,
) -> Result<MessagePage> {
    let tx = conn.transaction()?;
    ensure_log(&tx, project_id)?;
    let total = count_messages(&tx, project_id)?;
    let mut newest_first = {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE project_id = ?1 AND kind = 'message' ORDER BY seq DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                project_id.to_string(),
                i64::from(request.page_size()),
                i64::try_from(request.offset()).unwrap_or(i64::MAX)
            ],
            row_to_event,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    hydrate(&tx, &mut newest_first)?;
    tx.commit()?;
    Ok(MessagePage::assemble(newest_first, request, total))
}

pub fn summarize(conn: &mut Connection, project_id: &Uuid) -> Result<Summary> {
    let tx = conn.transaction()?;
    ensure_log(&tx, project_id)?;
    let total_message_count = count_messages(&tx, project_id)?;
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE project_id = ?1 AND kind = 'message' ORDER BY seq DESC LIMIT 1"
    );
    let last = tx
        .query_row(&sql, [project_id.to_string()], row_to_event)
        .optional()?;
    let last_message = match last {
        Some(mut event) => {
            hydrate(&tx, std::slice::from_mut(&mut event))?;
            Some(event)
        }
        None => None,
    };
    tx.commit()?;
    Ok(Summary {
        last_message,
        total_message_count,
    })
}

fn count_messages(conn: &Connection, project_id: &Uuid) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE project_id = ?1 AND kind = 'message'",
        [project_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Fill in attachments and read receipts for events loaded by `row_to_event`.
fn hydrate(conn: &Connection, events: &mut [Event]) -> Result<()> {
    let mut attachments =
        conn.prepare("SELECT reference FROM attachments WHERE event_id = ?1 ORDER BY position")?;
    let mut receipts = conn.prepare(
        "SELECT user_id, read_at FROM read_receipts WHERE event_id = ?1 ORDER BY read_at, rowid",
    )?;
    for event in events.iter_mut() {
        let id = event.id.to_string();
        event.attachments = attachments
            .query_map([&id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        event.read_by = receipts
            .query_map([&id], |row| {
                Ok(ReadReceipt {
                    user_id: uuid_column(row, 0)?,
                    read_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }
    Ok(())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let kind: String = row.get(2)?;
    let kind = kind
        .parse::<EventKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(Event {
        id: uuid_column(row, 0)?,
        seq: row.get(1)?,
        kind,
        content: row.get(3)?,
        author_id: uuid_column(row, 4)?,
        attachments: Vec::new(),
        created_at: row.get(5)?,
        read_by: Vec::new(),
    })
}

pub(crate) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
