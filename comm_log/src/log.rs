use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::model::{now_millis, Event, MessagePage, NewEvent, PageRequest, ReadReceipt, Summary};

/// Append-only event sequence owned by a single project.
///
/// Events are never removed or edited; the only mutation after an append is
/// growth of an event's `read_by` set. Callers sharing a log across threads
/// must serialize `&mut` access (see [`crate::store::MemoryStore`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationLog {
    project_id: Uuid,
    events: Vec<Event>,
}

impl CommunicationLog {
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            events: Vec::new(),
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// All events in append order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, event_id: &Uuid) -> Option<&Event> {
        self.events.iter().find(|e| e.id == *event_id)
    }

    pub fn append(&mut self, new: NewEvent) -> Result<Event> {
        self.append_at(new, now_millis())
    }

    /// Append with an explicit clock reading. A reading older than the last
    /// event is clamped so `created_at` never goes backwards.
    pub fn append_at(&mut self, new: NewEvent, now: i64) -> Result<Event> {
        let new = new.validate()?;
        let (seq, created_at) = match self.events.last() {
            Some(last) => (last.seq + 1, now.max(last.created_at)),
            None => (1, now),
        };
        let event = Event {
            id: Uuid::new_v4(),
            seq,
            kind: new.kind,
            content: new.content,
            author_id: new.author_id,
            attachments: new.attachments,
            created_at,
            read_by: Vec::new(),
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Page backwards through chat messages; each page comes back oldest first.
    pub fn list_messages(&self, request: PageRequest) -> MessagePage {
        let total = self.messages().count() as u64;
        let skip = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let newest_first = self
            .messages()
            .rev()
            .skip(skip)
            .take(request.page_size() as usize)
            .cloned()
            .collect();
        MessagePage::assemble(newest_first, request, total)
    }

    /// Returns `Ok(true)` when a new receipt was recorded and `Ok(false)` when
    /// the user had already read the event.
    pub fn mark_read(&mut self, event_id: &Uuid, user_id: Uuid) -> Result<bool> {
        self.mark_read_at(event_id, user_id, now_millis())
    }

    pub fn mark_read_at(&mut self, event_id: &Uuid, user_id: Uuid, now: i64) -> Result<bool> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == *event_id)
            .ok_or(LogError::EventNotFound(*event_id))?;
        if event.is_read_by(&user_id) {
            return Ok(false);
        }
        event.read_by.push(ReadReceipt {
            user_id,
            read_at: now,
        });
        Ok(true)
    }

    /// Messages the user has not marked read. Authoring a message does not
    /// mark it read.
    pub fn unread_count_for(&self, user_id: &Uuid) -> u64 {
        self.messages().filter(|e| !e.is_read_by(user_id)).count() as u64
    }

    pub fn summarize(&self) -> Summary {
        Summary {
            last_message: self.messages().next_back().cloned(),
            total_message_count: self.messages().count() as u64,
        }
    }

    fn messages(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_message())
    }
}
