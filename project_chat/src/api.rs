use crate::{
    auth::{self, Actor},
    config::Config,
    conversations::{self, Conversation},
    projects::{self, Project, ProjectError, ProjectStatus},
    typing::TypingTracker,
};
use anyhow::Result;
use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use comm_log::{
    db::DbPool, Event, LogError, LogStore, NewEvent, PageRequest, SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub logs: Arc<dyn LogStore>,
    pub typing: Arc<TypingTracker>,
    pub config: Config,
    secret: Arc<[u8]>,
}

impl AppState {
    /// Open the database under the configured data directory and wire up the
    /// shared handles. The pool lives as long as the last clone of the state.
    pub async fn new(config: Config) -> Result<Self> {
        let secret: Arc<[u8]> = match &config.jwt_secret {
            Some(s) => Arc::from(s.as_bytes()),
            None => anyhow::bail!("missing_jwt_secret"),
        };
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let store = SqliteStore::open(config.database_path())?;
        let pool = store.pool().clone();
        let conn = pool.get()?;
        projects::init_schema(&conn)?;
        drop(conn);
        Ok(Self {
            pool,
            logs: Arc::new(store),
            typing: Arc::new(TypingTracker::new(config.typing_window)),
            config,
            secret,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/projects/:id/developer", put(assign_developer))
        .route("/api/projects/:id/status", put(update_status))
        .route("/api/chat/conversations", get(list_conversations))
        .route(
            "/api/chat/projects/:id/messages",
            get(list_messages).post(post_message),
        )
        .route("/api/chat/projects/:id/events", post(post_event))
        .route(
            "/api/chat/projects/:id/messages/:event_id/read",
            put(mark_read),
        )
        .route("/api/chat/projects/:id/summary", get(summary))
        .route(
            "/api/chat/projects/:id/typing",
            get(typing_users).post(typing),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer_token);
    let Some(token) = token else {
        return Err(err(StatusCode::UNAUTHORIZED, "missing_token"));
    };
    match auth::verify_jwt(&state.secret, token) {
        Ok(claims) => {
            req.extensions_mut().insert(Actor::from(claims));
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected bearer token");
            Err(err(StatusCode::UNAUTHORIZED, "invalid_token"))
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

/// Error response in the `{"error": "..."}` shape used by every route.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

fn err(status: StatusCode, msg: &str) -> ApiError {
    ApiError {
        status,
        message: msg.into(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResp {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Validation(reason) => err(StatusCode::BAD_REQUEST, &reason),
            LogError::EventNotFound(_) => err(StatusCode::NOT_FOUND, "message_not_found"),
            LogError::LogNotFound(_) => err(StatusCode::NOT_FOUND, "project_not_found"),
            LogError::Concurrency => err(StatusCode::CONFLICT, "conflict_retry"),
            other => {
                tracing::error!(error = %other, "log storage failure");
                err(StatusCode::INTERNAL_SERVER_ERROR, "storage")
            }
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::InvalidTitle => err(StatusCode::BAD_REQUEST, "invalid_title"),
            ProjectError::InvalidStatus(_) => err(StatusCode::BAD_REQUEST, "invalid_status"),
            ProjectError::NotFound => err(StatusCode::NOT_FOUND, "project_not_found"),
            ProjectError::Forbidden => err(StatusCode::FORBIDDEN, "forbidden"),
            ProjectError::Log(inner) => inner.into(),
            ProjectError::Storage(inner) => {
                tracing::error!(error = %inner, "project storage failure");
                err(StatusCode::INTERNAL_SERVER_ERROR, "storage")
            }
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        tracing::error!(error = %e, "connection pool exhausted");
        err(StatusCode::INTERNAL_SERVER_ERROR, "storage")
    }
}

/// Resolve a project the actor may use, or 404.
fn accessible_project(state: &AppState, id: &Uuid, actor: &Actor) -> Result<Project, ApiError> {
    let conn = state.pool.get()?;
    Ok(projects::get_accessible(&conn, id, actor)?)
}

#[derive(Deserialize)]
struct CreateProjectReq {
    #[serde(default)]
    title: String,
}

async fn create_project(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateProjectReq>,
) -> Result<impl IntoResponse, ApiError> {
    let conn = state.pool.get()?;
    let project = projects::create_project(&conn, state.logs.as_ref(), &req.title, &actor)?;
    tracing::info!(project = %project.id, owner = %actor.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Deserialize)]
struct ProjectsQuery {
    status: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct ProjectsPagination {
    current: u32,
    pages: u64,
    total: u64,
}

#[derive(Serialize)]
struct ProjectsResp {
    projects: Vec<Project>,
    pagination: ProjectsPagination,
}

const DEFAULT_PROJECTS_PER_PAGE: u32 = 10;

async fn list_projects(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(q): Query<ProjectsQuery>,
) -> Result<Json<ProjectsResp>, ApiError> {
    let status = match q.status.as_deref() {
        Some(raw) => Some(raw.parse::<ProjectStatus>()?),
        None => None,
    };
    let limit = q
        .limit
        .unwrap_or(DEFAULT_PROJECTS_PER_PAGE)
        .min(state.config.max_page_size);
    let request = PageRequest::new(q.page.unwrap_or(1), limit)?;
    let conn = state.pool.get()?;
    let (projects, total) = projects::list_owned(&conn, &actor.id, status, request)?;
    Ok(Json(ProjectsResp {
        projects,
        pagination: ProjectsPagination {
            current: request.page(),
            pages: total.div_ceil(u64::from(request.page_size())),
            total,
        },
    }))
}

async fn get_project(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(accessible_project(&state, &id, &actor)?))
}

#[derive(Deserialize)]
struct AssignReq {
    developer_id: Uuid,
}

async fn assign_developer(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignReq>,
) -> Result<Json<Project>, ApiError> {
    let conn = state.pool.get()?;
    let project =
        projects::assign_developer(&conn, state.logs.as_ref(), &id, &req.developer_id, &actor)?;
    tracing::info!(project = %id, developer = %req.developer_id, "developer assigned");
    Ok(Json(project))
}

#[derive(Deserialize)]
struct StatusReq {
    status: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusReq>,
) -> Result<Json<Project>, ApiError> {
    let status: ProjectStatus = req.status.parse()?;
    let conn = state.pool.get()?;
    let project = projects::update_status(
        &conn,
        state.logs.as_ref(),
        &id,
        status,
        req.notes.as_deref(),
        &actor,
    )?;
    tracing::info!(project = %id, status = %status, "status updated");
    Ok(Json(project))
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<ConversationsResp>, ApiError> {
    let conn = state.pool.get()?;
    let conversations = conversations::conversations_for(&conn, state.logs.as_ref(), &actor)?;
    Ok(Json(ConversationsResp { conversations }))
}

#[derive(Serialize)]
struct ConversationsResp {
    conversations: Vec<Conversation>,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct Pagination {
    current: u32,
    has_more: bool,
}

#[derive(Serialize)]
struct MessagesResp {
    messages: Vec<Event>,
    pagination: Pagination,
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<MessagesResp>, ApiError> {
    let project = accessible_project(&state, &id, &actor)?;
    let limit = q
        .limit
        .unwrap_or(state.config.page_size)
        .min(state.config.max_page_size);
    let request = PageRequest::new(q.page.unwrap_or(1), limit)?;
    let page = state.logs.list_messages(&project.id, request)?;
    Ok(Json(MessagesResp {
        messages: page.messages,
        pagination: Pagination {
            current: page.page,
            has_more: page.has_more,
        },
    }))
}

#[derive(Deserialize)]
struct MessageReq {
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<String>,
}

async fn post_message(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageReq>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewEvent::message(req.content, actor.id).with_attachments(req.attachments);
    append(&state, &id, &actor, new)
}

#[derive(Deserialize)]
struct EventReq {
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<String>,
}

async fn post_event(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<EventReq>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewEvent::parse(&req.kind, req.content, actor.id)?.with_attachments(req.attachments);
    append(&state, &id, &actor, new)
}

fn append(
    state: &AppState,
    id: &Uuid,
    actor: &Actor,
    new: NewEvent,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let project = accessible_project(state, id, actor)?;
    let event = state.logs.append(&project.id, new)?;
    let conn = state.pool.get()?;
    projects::touch(&conn, &project.id)?;
    tracing::info!(project = %project.id, event = %event.id, kind = %event.kind, "event appended");
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Serialize)]
struct ReadResp {
    newly_read: bool,
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReadResp>, ApiError> {
    let project = accessible_project(&state, &id, &actor)?;
    let newly_read = state.logs.mark_read(&project.id, &event_id, &actor.id)?;
    Ok(Json(ReadResp { newly_read }))
}

#[derive(Serialize)]
struct SummaryResp {
    last_message: Option<Event>,
    total_message_count: u64,
    unread_count: u64,
}

async fn summary(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<SummaryResp>, ApiError> {
    let project = accessible_project(&state, &id, &actor)?;
    let summary = state.logs.summarize(&project.id)?;
    let unread_count = state.logs.unread_count_for(&project.id, &actor.id)?;
    Ok(Json(SummaryResp {
        last_message: summary.last_message,
        total_message_count: summary.total_message_count,
        unread_count,
    }))
}

#[derive(Deserialize)]
struct TypingReq {
    is_typing: bool,
}

#[derive(Serialize)]
struct TypingResp {
    users: Vec<Uuid>,
}

async fn typing(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<TypingReq>,
) -> Result<StatusCode, ApiError> {
    let project = accessible_project(&state, &id, &actor)?;
    if req.is_typing {
        state.typing.typing(actor.id, project.id);
    } else {
        state.typing.stopped(actor.id, project.id);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn typing_users(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<TypingResp>, ApiError> {
    let project = accessible_project(&state, &id, &actor)?;
    Ok(Json(TypingResp {
        users: state.typing.typing_in(project.id),
    }))
}

/// Run the HTTP server until Ctrl-C, then release the database pool.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    tracing::info!(%addr, "project chat listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    tracing::info!("server stopped");
    Ok(())
}
