//! Append-only communication log kept per project.
//!
//! A log holds chat messages, file notices, milestones and status updates in
//! insertion order. Each event carries a set of read receipts, one per user,
//! from which unread counts are derived. [`CommunicationLog`] is the
//! in-process structure; [`LogStore`] abstracts over keeping many logs in
//! memory ([`MemoryStore`]) or in SQLite ([`SqliteStore`]).

pub mod db;
pub mod error;
pub mod events;
pub mod log;
pub mod model;
pub mod reads;
pub mod sqlite;
pub mod store;

pub use error::{LogError, Result};
pub use log::CommunicationLog;
pub use model::{
    Event, EventKind, MessagePage, NewEvent, PageRequest, ReadReceipt, Summary, MAX_MESSAGE_CHARS,
};
pub use sqlite::SqliteStore;
pub use store::{LogStore, MemoryStore};
