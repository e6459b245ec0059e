use std::fmt;
use std::str::FromStr;

use comm_log::model::now_millis;
use comm_log::{LogError, LogStore, NewEvent, PageRequest};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::Actor;

pub const MAX_TITLE_CHARS: usize = 100;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  owner_id TEXT NOT NULL,
  assigned_developer_id TEXT,
  status TEXT NOT NULL DEFAULT 'draft',
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS projects_by_owner ON projects(owner_id, status);
CREATE INDEX IF NOT EXISTS projects_by_developer ON projects(assigned_developer_id, status);
"#;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("invalid_title")]
    InvalidTitle,
    #[error("invalid_status: {0}")]
    InvalidStatus(String),
    /// Unknown project, or one the actor may not see.
    #[error("project_not_found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ProjectError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Draft,
    Prototype,
    InDevelopment,
    Testing,
    Deployed,
    Cancelled,
}

impl ProjectStatus {
    const ALL: [ProjectStatus; 6] = [
        ProjectStatus::Draft,
        ProjectStatus::Prototype,
        ProjectStatus::InDevelopment,
        ProjectStatus::Testing,
        ProjectStatus::Deployed,
        ProjectStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Prototype => "prototype",
            ProjectStatus::InDevelopment => "in-development",
            ProjectStatus::Testing => "testing",
            ProjectStatus::Deployed => "deployed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which a project shows up as an open conversation.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Prototype | ProjectStatus::InDevelopment | ProjectStatus::Testing
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self> {
        ProjectStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ProjectError::InvalidStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub assigned_developer_id: Option<Uuid>,
    pub status: ProjectStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// Owner, assigned developer and admins may use the project's log.
    pub fn can_access(&self, actor: &Actor) -> bool {
        actor.is_admin()
            || self.owner_id == actor.id
            || self.assigned_developer_id == Some(actor.id)
    }
}

/// Create the project table. Logs may live in any [`LogStore`], so the table
/// carries no reference to the log tables.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Create a project owned by `owner` together with its communication log.
///
/// The log and its opening event are written before the project row, and
/// the log is dropped again when the row cannot be stored. A failed call
/// leaves no project behind and can be retried.
pub fn create_project(
    conn: &Connection,
    logs: &dyn LogStore,
    title: &str,
    owner: &Actor,
) -> Result<Project> {
    let title = title.trim();
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_CHARS {
        return Err(ProjectError::InvalidTitle);
    }
    let id = Uuid::new_v4();
    logs.create_log(&id)?;
    let opened = logs
        .append(&id, NewEvent::status_update("Project created successfully", owner.id))
        .map_err(ProjectError::from)
        .and_then(|_| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO projects (id, title, owner_id, status, created_at, updated_at) VALUES (?1, ?2, ?3, 'draft', ?4, ?4)",
                params![id.to_string(), title, owner.id.to_string(), now],
            )?;
            Ok(now)
        });
    let now = match opened {
        Ok(now) => now,
        Err(e) => {
            if let Err(cleanup) = logs.delete_log(&id) {
                tracing::warn!(project = %id, error = %cleanup, "orphaned log left behind");
            }
            return Err(e);
        }
    };
    Ok(Project {
        id,
        title: title.into(),
        owner_id: owner.id,
        assigned_developer_id: None,
        status: ProjectStatus::Draft,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_project(conn: &Connection, id: &Uuid) -> Result<Option<Project>> {
    let project = conn
        .query_row(
            "SELECT id, title, owner_id, assigned_developer_id, status, created_at, updated_at FROM projects WHERE id = ?1",
            [id.to_string()],
            row_to_project,
        )
        .optional()?;
    Ok(project)
}

/// Load a project the actor may see. Missing and off-limits projects produce
/// the same error so existence is never revealed.
pub fn get_accessible(conn: &Connection, id: &Uuid, actor: &Actor) -> Result<Project> {
    match get_project(conn, id)? {
        Some(p) if p.can_access(actor) => Ok(p),
        _ => Err(ProjectError::NotFound),
    }
}

/// Admin-only: hand the project to a developer and start development.
pub fn assign_developer(
    conn: &Connection,
    logs: &dyn LogStore,
    id: &Uuid,
    developer_id: &Uuid,
    actor: &Actor,
) -> Result<Project> {
    if !actor.is_admin() {
        return Err(ProjectError::Forbidden);
    }
    let before = get_project(conn, id)?.ok_or(ProjectError::NotFound)?;
    let after = Project {
        assigned_developer_id: Some(*developer_id),
        status: ProjectStatus::InDevelopment,
        updated_at: now_millis().max(before.updated_at),
        ..before.clone()
    };
    let note = NewEvent::status_update(format!("Project assigned to developer {developer_id}"), actor.id);
    apply_change(conn, logs, &before, &after, note)?;
    Ok(after)
}

/// Move a project to a new status. Only its assigned developer or an admin
/// may do this; other developers see the project as missing.
pub fn update_status(
    conn: &Connection,
    logs: &dyn LogStore,
    id: &Uuid,
    status: ProjectStatus,
    notes: Option<&str>,
    actor: &Actor,
) -> Result<Project> {
    if !actor.can_update_status() {
        return Err(ProjectError::Forbidden);
    }
    let before = get_project(conn, id)?.ok_or(ProjectError::NotFound)?;
    if !actor.is_admin() && before.assigned_developer_id != Some(actor.id) {
        return Err(ProjectError::NotFound);
    }
    let after = Project {
        status,
        updated_at: now_millis().max(before.updated_at),
        ..before.clone()
    };
    let text = match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("Status updated to {status}: {notes}"),
        None => format!("Status updated to {status}"),
    };
    apply_change(conn, logs, &before, &after, NewEvent::status_update(text, actor.id))?;
    Ok(after)
}

/// Store `after` and record `note` in the project's log. When the note
/// cannot be appended the row is put back to `before`, so the caller sees
/// either both writes or neither.
fn apply_change(
    conn: &Connection,
    logs: &dyn LogStore,
    before: &Project,
    after: &Project,
    note: NewEvent,
) -> Result<()> {
    if write_row(conn, after)? == 0 {
        return Err(ProjectError::NotFound);
    }
    if let Err(e) = logs.append(&after.id, note) {
        if let Err(restore) = write_row(conn, before) {
            tracing::warn!(project = %before.id, error = %restore, "could not roll back project change");
        }
        return Err(e.into());
    }
    Ok(())
}

fn write_row(conn: &Connection, project: &Project) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE projects SET assigned_developer_id = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            project.id.to_string(),
            project.assigned_developer_id.map(|d| d.to_string()),
            project.status.as_str(),
            project.updated_at
        ],
    )?;
    Ok(changed)
}

/// Bump `updated_at`, e.g. after a new message.
pub fn touch(conn: &Connection, id: &Uuid) -> Result<()> {
    conn.execute(
        "UPDATE projects SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
        params![id.to_string(), now_millis()],
    )?;
    Ok(())
}

/// Projects the user owns or develops, most recently updated first.
pub fn list_for_participant(conn: &Connection, user_id: &Uuid) -> Result<Vec<Project>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, owner_id, assigned_developer_id, status, created_at, updated_at FROM projects WHERE owner_id = ?1 OR assigned_developer_id = ?1 ORDER BY updated_at DESC, rowid DESC",
    )?;
    let projects = stmt
        .query_map([user_id.to_string()], row_to_project)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(projects)
}

/// One page of the projects `owner_id` owns, newest first, optionally
/// narrowed to one status. Returns the page and the number of matches.
pub fn list_owned(
    conn: &Connection,
    owner_id: &Uuid,
    status: Option<ProjectStatus>,
    request: PageRequest,
) -> Result<(Vec<Project>, u64)> {
    let status = status.map(|s| s.as_str());
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)",
        params![owner_id.to_string(), status],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT id, title, owner_id, assigned_developer_id, status, created_at, updated_at FROM projects WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4",
    )?;
    let projects = stmt
        .query_map(
            params![
                owner_id.to_string(),
                status,
                i64::from(request.page_size()),
                i64::try_from(request.offset()).unwrap_or(i64::MAX)
            ],
            row_to_project,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((projects, total as u64))
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<ProjectStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Project {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        assigned_developer_id: match row.get::<_, Option<String>>(3)? {
            Some(_) => Some(uuid_at(row, 3)?),
            None => None,
        },
        status,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
