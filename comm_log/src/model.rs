use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LogError, Result};

/// Longest chat message accepted, counted in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    File,
    Milestone,
    StatusUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Message,
        EventKind::File,
        EventKind::Milestone,
        EventKind::StatusUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::File => "file",
            EventKind::Milestone => "milestone",
            EventKind::StatusUpdate => "status-update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| LogError::validation(format!("unknown_kind: {s}")))
    }
}

/// Marks that `user_id` has seen an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: i64,
}

/// One entry of a project's communication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Position within the owning log, strictly increasing from 1.
    pub seq: i64,
    pub kind: EventKind,
    pub content: String,
    pub author_id: Uuid,
    pub attachments: Vec<String>,
    pub created_at: i64,
    pub read_by: Vec<ReadReceipt>,
}

impl Event {
    pub fn is_message(&self) -> bool {
        self.kind == EventKind::Message
    }

    pub fn is_read_by(&self, user_id: &Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == *user_id)
    }
}

/// Input for an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub kind: EventKind,
    pub content: String,
    pub author_id: Uuid,
    pub attachments: Vec<String>,
}

impl NewEvent {
    pub fn new(kind: EventKind, content: impl Into<String>, author_id: Uuid) -> Self {
        Self {
            kind,
            content: content.into(),
            author_id,
            attachments: Vec::new(),
        }
    }

    pub fn message(content: impl Into<String>, author_id: Uuid) -> Self {
        Self::new(EventKind::Message, content, author_id)
    }

    pub fn status_update(content: impl Into<String>, author_id: Uuid) -> Self {
        Self::new(EventKind::StatusUpdate, content, author_id)
    }

    /// Build from a wire kind name, rejecting anything outside the four kinds.
    pub fn parse(kind: &str, content: impl Into<String>, author_id: Uuid) -> Result<Self> {
        Ok(Self::new(kind.parse()?, content, author_id))
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Check the content rules and return the event in stored form.
    ///
    /// Only messages are constrained: the trimmed text must hold between 1
    /// and [`MAX_MESSAGE_CHARS`] characters, and the trimmed text is what gets
    /// stored.
    pub fn validate(mut self) -> Result<Self> {
        if self.kind == EventKind::Message {
            let trimmed = self.content.trim();
            let len = trimmed.chars().count();
            if len == 0 {
                return Err(LogError::validation("empty_message"));
            }
            if len > MAX_MESSAGE_CHARS {
                return Err(LogError::validation("message_too_long"));
            }
            if trimmed.len() != self.content.len() {
                self.content = trimmed.to_string();
            }
        }
        Ok(self)
    }
}

/// A 1-based page request over the message view of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 {
            return Err(LogError::validation("page_must_be_positive"));
        }
        if page_size == 0 {
            return Err(LogError::validation("page_size_must_be_positive"));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of newer messages skipped before this page starts.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// Number of messages covered by this page and every page before it.
    pub fn end(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }
}

/// One page of chat messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Event>,
    pub page: u32,
    pub has_more: bool,
}

impl MessagePage {
    pub(crate) fn assemble(mut newest_first: Vec<Event>, request: PageRequest, total: u64) -> Self {
        newest_first.reverse();
        Self {
            messages: newest_first,
            page: request.page(),
            has_more: total > request.end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub last_message: Option<Event>,
    pub total_message_count: u64,
}
