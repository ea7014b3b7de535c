//! HTTP front end for fixd.
//!
//! Local-only REST API: upload a script and get the pipeline report, fetch
//! sessions, download the fixed script, release a session.
//!
//! Each upload runs on its own task, so a client that disconnects mid-run
//! does not stop the pipeline or skip workspace cleanup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fix_core::{Config, Id, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::backend::Credential;
use crate::pipeline::Pipeline;
use crate::session::{release_dir, sanitize_filename, SessionStore, SessionWorkspace};

/// Room for JSON framing and escaping around the script source.
const BODY_LIMIT_OVERHEAD: usize = 64 * 1024;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Pipeline,
    pub sessions: SessionStore,
    pub permits: Arc<Semaphore>,
    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new(config: Config, auth_token: Option<String>) -> Self {
        Self {
            pipeline: Pipeline::from_config(&config),
            sessions: SessionStore::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1))),
            auth_token,
            config,
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Escaped JSON can double the source size.
    let body_limit = state.config.max_upload_bytes.saturating_mul(2) + BODY_LIMIT_OVERHEAD;

    // Auth runs before any extractor reads the body. /health stays open.
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(release_session))
        .route("/sessions/{id}/download", get(download_fixed))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_auth))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; returns when `shutdown` is cancelled.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);

    // Local only.
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Validate the daemon auth token if configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(api_error(StatusCode::UNAUTHORIZED, "invalid auth token")),
        None => Err(api_error(StatusCode::UNAUTHORIZED, "missing auth token")),
    }
}

/// Reject requests without the daemon auth token.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_auth(&state, &headers)?;
    Ok(next.run(request).await)
}

// --- Request/Response types ---

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request payload for POST /sessions.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Upload name; must end in `.py`.
    pub filename: String,
    pub source: String,
    /// Credential for the completion API.
    #[serde(default)]
    pub api_key: String,
}

/// Response carrying one session.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
}

/// Response for GET /sessions.
#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
}

// --- Handlers ---

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "backend": state.pipeline.backend_config().mode.as_str(),
    }))
}

/// POST /sessions - upload a script and run the fix pipeline.
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = sanitize_filename(&req.filename).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("only .py files are accepted, got '{}'", req.filename),
        )
    })?;

    let credential = Credential::new(req.api_key);
    if credential.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "an API key is required"));
    }

    if req.source.len() > state.config.max_upload_bytes {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "script is {} bytes; limit is {}",
                req.source.len(),
                state.config.max_upload_bytes
            ),
        ));
    }

    let permit = Arc::clone(&state.permits).acquire_owned().await.map_err(|_| {
        api_error(StatusCode::SERVICE_UNAVAILABLE, "daemon is shutting down")
    })?;

    let session = Session::new(filename);
    let workspace = match SessionWorkspace::create(
        &state.config.work_dir,
        &session.id,
        &session.filename,
        req.source.as_bytes(),
    ) {
        Ok(workspace) => workspace,
        Err(e) => {
            error!(session_id = %session.id, error = %e, "failed to create session workspace");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to store upload: {e}"),
            ));
        }
    };

    info!(session_id = %session.id, filename = %session.filename, "session created");
    let session_id = session.id.clone();
    let task_state = Arc::clone(&state);
    // Nothing between the permit and the spawn may await.
    let task = tokio::spawn(async move {
        let _permit = permit;
        let mut session = session;
        let state = task_state;
        state.sessions.put(session.clone()).await;
        state
            .pipeline
            .run(&workspace, &credential, &state.sessions, &mut session)
            .await;

        if !state.config.keep_artifacts {
            workspace.release();
        }

        info!(
            session_id = %session.id,
            state = session.state.as_str(),
            "session finished"
        );
        session
    });

    let session = task.await.map_err(|e| {
        error!(session_id = %session_id, error = %e, "pipeline task failed");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("pipeline task failed: {e}"),
        )
    })?;

    Ok((StatusCode::CREATED, Json(SessionResponse { session })))
}

/// GET /sessions - list sessions.
async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.list().await;
    Ok(Json(ListSessionsResponse { sessions }))
}

async fn find_session(state: &AppState, id: &str) -> Result<Session, ApiError> {
    state
        .sessions
        .get(&Id::from_string(id))
        .await
        .ok_or_else(|| {
            warn!("session not found: {}", id);
            api_error(StatusCode::NOT_FOUND, format!("session not found: {id}"))
        })
}

/// GET /sessions/{id} - get a single session.
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &id).await?;
    Ok(Json(SessionResponse { session }))
}

/// GET /sessions/{id}/download - the fixed script as a plain-text attachment.
async fn download_fixed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &id).await?;

    let download_name = session.download_name();
    let Some(source) = session.fixed_source else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("session {id} has no fixed script"),
        ));
    };

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{download_name}\""))
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        source,
    ))
}

/// DELETE /sessions/{id} - forget a finished session and remove its files.
async fn release_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &id).await?;
    if !session.state.is_terminal() {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("session {id} is still {}", session.state.as_str()),
        ));
    }

    let session_id = session.id;
    if state.sessions.remove(&session_id).await.is_none() {
        warn!("session not found: {}", id);
        return Err(api_error(StatusCode::NOT_FOUND, format!("session not found: {id}")));
    }

    release_dir(&SessionWorkspace::dir_for(&state.config.work_dir, &session_id));
    info!("released session: {}", id);
    Ok(StatusCode::NO_CONTENT)
}
