use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::log::CommunicationLog;
use crate::model::{Event, MessagePage, NewEvent, PageRequest, Summary};

/// Storage for the communication logs of many projects.
///
/// Implementations serialize appends per project so each log has one total
/// order, and treat read-marking as an idempotent set union.
pub trait LogStore: Send + Sync {
    /// Create the empty log that belongs to a new project.
    fn create_log(&self, project_id: &Uuid) -> Result<()>;

    /// Destroy a project's log with every event in it.
    fn delete_log(&self, project_id: &Uuid) -> Result<()>;

    fn append(&self, project_id: &Uuid, new: NewEvent) -> Result<Event>;

    fn get_event(&self, project_id: &Uuid, event_id: &Uuid) -> Result<Event>;

    fn list_messages(&self, project_id: &Uuid, request: PageRequest) -> Result<MessagePage>;

    /// Returns whether a new receipt was recorded.
    fn mark_read(&self, project_id: &Uuid, event_id: &Uuid, user_id: &Uuid) -> Result<bool>;

    fn unread_count_for(&self, project_id: &Uuid, user_id: &Uuid) -> Result<u64>;

    fn summarize(&self, project_id: &Uuid) -> Result<Summary>;
}

/// In-process store keeping every log in memory behind its own lock.
#[derive(Default)]
pub struct MemoryStore {
    logs: RwLock<HashMap<Uuid, Arc<RwLock<CommunicationLog>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, project_id: &Uuid) -> Result<Arc<RwLock<CommunicationLog>>> {
        self.logs
            .read()
            .get(project_id)
            .cloned()
            .ok_or(LogError::LogNotFound(*project_id))
    }
}

impl LogStore for MemoryStore {
    fn create_log(&self, project_id: &Uuid) -> Result<()> {
        self.logs
            .write()
            .entry(*project_id)
            .or_insert_with(|| Arc::new(RwLock::new(CommunicationLog::new(*project_id))));
        Ok(())
    }

    fn delete_log(&self, project_id: &Uuid) -> Result<()> {
        self.logs
            .write()
            .remove(project_id)
            .map(|_| ())
            .ok_or(LogError::LogNotFound(*project_id))
    }

    fn append(&self, project_id: &Uuid, new: NewEvent) -> Result<Event> {
        self.log(project_id)?.write().append(new)
    }

    fn get_event(&self, project_id: &Uuid, event_id: &Uuid) -> Result<Event> {
        self.log(project_id)?
            .read()
            .get(event_id)
            .cloned()
            .ok_or(LogError::EventNotFound(*event_id))
    }

    fn list_messages(&self, project_id: &Uuid, request: PageRequest) -> Result<MessagePage> {
        Ok(self.log(project_id)?.read().list_messages(request))
    }

    fn mark_read(&self, project_id: &Uuid, event_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.log(project_id)?.write().mark_read(event_id, *user_id)
    }

    fn unread_count_for(&self, project_id: &Uuid, user_id: &Uuid) -> Result<u64> {
        Ok(self.log(project_id)?.read().unread_count_for(user_id))
    }

    fn summarize(&self, project_id: &Uuid) -> Result<Summary> {
        Ok(self.log(project_id)?.read().summarize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_appends_keep_every_event() {
        let store = Arc::new(MemoryStore::new());
        let project = Uuid::new_v4();
        store.create_log(&project).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let author = Uuid::new_v4();
                    for i in 0..25 {
                        store
                            .append(&project, NewEvent::message(format!("m{i}"), author))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let summary = store.summarize(&project).unwrap();
        assert_eq!(summary.total_message_count, 200);
        assert_eq!(summary.last_message.unwrap().seq, 200);
    }

    #[test]
    fn concurrent_reads_collapse_per_user() {
        let store = Arc::new(MemoryStore::new());
        let project = Uuid::new_v4();
        store.create_log(&project).unwrap();
        let event_id = store
            .append(&project, NewEvent::message("hi", Uuid::new_v4()))
            .unwrap()
            .id;
        let readers: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let handles: Vec<_> = readers
            .iter()
            .flat_map(|r| [*r, *r])
            .map(|reader| {
                let store = store.clone();
                thread::spawn(move || store.mark_read(&project, &event_id, &reader).unwrap())
            })
            .collect();
        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(fresh, readers.len());
        let stored = store.get_event(&project, &event_id).unwrap();
        assert_eq!(stored.read_by.len(), readers.len());
    }

    #[test]
    fn unknown_project() {
        let store = MemoryStore::new();
        let ghost = Uuid::new_v4();
        assert!(matches!(
            store.summarize(&ghost),
            Err(LogError::LogNotFound(_))
        ));
        assert!(store.delete_log(&ghost).is_err());
    }
}
