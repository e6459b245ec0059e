use comm_log::LogStore;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Actor;
use crate::projects::{self, ProjectStatus, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastMessage {
    pub id: Uuid,
    pub content: String,
    pub author_id: Uuid,
    pub created_at: i64,
}

/// Chat overview row for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub project_id: Uuid,
    pub title: String,
    pub status: ProjectStatus,
    pub owner_id: Uuid,
    pub assigned_developer_id: Option<Uuid>,
    pub last_message: Option<LastMessage>,
    pub unread_count: u64,
}

/// Open conversations of the actor: active projects they own or develop,
/// most recently updated first, with the last message and the actor's unread
/// count.
pub fn conversations_for(
    conn: &Connection,
    logs: &dyn LogStore,
    actor: &Actor,
) -> Result<Vec<Conversation>> {
    let mut out = Vec::new();
    for project in projects::list_for_participant(conn, &actor.id)? {
        if !project.status.is_active() {
            continue;
        }
        let summary = logs.summarize(&project.id)?;
        let unread_count = logs.unread_count_for(&project.id, &actor.id)?;
        out.push(Conversation {
            project_id: project.id,
            title: project.title,
            status: project.status,
            owner_id: project.owner_id,
            assigned_developer_id: project.assigned_developer_id,
            last_message: summary.last_message.map(|m| LastMessage {
                id: m.id,
                content: m.content,
                author_id: m.author_id,
                created_at: m.created_at,
            }),
            unread_count,
        });
    }
    Ok(out)
}
