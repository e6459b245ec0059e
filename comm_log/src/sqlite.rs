use std::path::Path;

use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::Result;
use crate::model::{Event, MessagePage, NewEvent, PageRequest, Summary};
use crate::store::LogStore;
use crate::{events, reads};

/// [`LogStore`] backed by a pooled SQLite database, one row per event.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_pool(db::open_pool(path)?))
    }

    /// Wrap a pool whose database already carries the schema.
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl LogStore for SqliteStore {
    fn create_log(&self, project_id: &Uuid) -> Result<()> {
        let conn = self.pool.get()?;
        events::create_log(&conn, project_id)
    }

    fn delete_log(&self, project_id: &Uuid) -> Result<()> {
        let conn = self.pool.get()?;
        events::delete_log(&conn, project_id)
    }

    fn append(&self, project_id: &Uuid, new: NewEvent) -> Result<Event> {
        let mut conn = self.pool.get()?;
        events::append_event(&mut conn, project_id, new)
    }

    fn get_event(&self, project_id: &Uuid, event_id: &Uuid) -> Result<Event> {
        let conn = self.pool.get()?;
        events::get_event(&conn, project_id, event_id)
    }

    fn list_messages(&self, project_id: &Uuid, request: PageRequest) -> Result<MessagePage> {
        let mut conn = self.pool.get()?;
        events::list_messages(&mut conn, project_id, request)
    }

    fn mark_read(&self, project_id: &Uuid, event_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        let mut conn = self.pool.get()?;
        reads::mark_read(&mut conn, project_id, event_id, user_id)
    }

    fn unread_count_for(&self, project_id: &Uuid, user_id: &Uuid) -> Result<u64> {
        let conn = self.pool.get()?;
        reads::unread_count(&conn, project_id, user_id)
    }

    fn summarize(&self, project_id: &Uuid) -> Result<Summary> {
        let mut conn = self.pool.get()?;
        events::summarize(&mut conn, project_id)
    }
}
