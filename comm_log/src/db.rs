use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::Result;

/// How long a connection waits on a locked database before reporting a
/// conflict.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a single connection and apply the schema.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Build the shared connection pool for a database file.
///
/// The schema is applied once here, before the pool is handed out. Every
/// pooled connection enables foreign keys so deleting a log cascades to its
/// events and receipts.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    init_db(path.as_ref())?;
    let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|c| configure(c));
    let pool = Pool::new(manager)?;
    Ok(pool)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
  project_id TEXT PRIMARY KEY,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL REFERENCES logs(project_id) ON DELETE CASCADE,
  seq INTEGER NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('message', 'file', 'milestone', 'status-update')),
  content TEXT NOT NULL,
  author_id TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  UNIQUE(project_id, seq)
);

CREATE INDEX IF NOT EXISTS events_by_kind ON events(project_id, kind, seq);

CREATE TABLE IF NOT EXISTS attachments (
  event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  reference TEXT NOT NULL,
  PRIMARY KEY (event_id, position)
);

CREATE TABLE IF NOT EXISTS read_receipts (
  event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
  user_id TEXT NOT NULL,
  read_at INTEGER NOT NULL,
  PRIMARY KEY (event_id, user_id)
);
"#;
