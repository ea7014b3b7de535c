//! HTTP client for the fixd daemon.
//!
//! Communicates with fixd via its local HTTP API.

use fix_core::Session;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: fixd\n  → or set FIXD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("unauthorized: check FIXD_TOKEN env var or --token flag")]
    Unauthorized,

    #[error("an API key is required: pass --api-key or set OPENAI_API_KEY")]
    MissingApiKey,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure fixd is running\n  → check FIXD_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::IoError(e.to_string())
    }
}

/// Request payload for uploading a script (POST /sessions).
#[derive(Debug, Serialize)]
pub struct CreateSessionRequest {
    pub filename: String,
    pub source: String,
    pub api_key: String,
}

/// Response carrying one session.
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
}

/// Response from list sessions endpoint.
#[derive(Debug, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
}

/// Error response from API.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A downloaded fixed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Suggested file name from `Content-Disposition`.
    pub filename: Option<String>,
    pub source: String,
}

/// Default total timeout for daemon readiness check.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for readiness check.
const INITIAL_BACKOFF_MS: u64 = 200;

/// Extract `filename` from an `attachment; filename="..."` header value.
pub fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// HTTP client for fixd.
#[derive(Debug)]
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    /// Check if daemon is healthy by probing /health endpoint.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for daemon to become ready with exponential backoff.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    /// Wait for daemon to become ready with custom timeout.
    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }

                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;

                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    /// Build headers with optional auth token.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Handle error response from API.
    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if status == 401 {
            return ClientError::Unauthorized;
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "unknown error".to_string());

        match status {
            404 => ClientError::NotFound(message),
            400 | 413 => ClientError::Rejected(message),
            _ => ClientError::HttpError { status, message },
        }
    }

    /// Upload a script and wait for the pipeline report.
    /// POST /sessions
    pub async fn create_session(&self, req: &CreateSessionRequest) -> Result<Session, ClientError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        Ok(body.session)
    }

    /// List sessions.
    /// GET /sessions
    pub async fn list_sessions(&self) -> Result<Vec<Session>, ClientError> {
        let url = format!("{}/sessions", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: ListSessionsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        Ok(body.sessions)
    }

    /// Get a single session.
    /// GET /sessions/{id}
    pub async fn get_session(&self, session_id: &str) -> Result<Session, ClientError> {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        Ok(body.session)
    }

    /// Download the fixed script.
    /// GET /sessions/{id}/download
    pub async fn download(&self, session_id: &str) -> Result<Download, ClientError> {
        let url = format!("{}/sessions/{}/download", self.base_url, session_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename);
        let source = response
            .text()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        Ok(Download { filename, source })
    }

    /// Release a session and its files.
    /// DELETE /sessions/{id}
    pub async fn release(&self, session_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        let response = self
            .http
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn attachment_filename_parses_quoted_name() {
        assert_eq!(
            attachment_filename("attachment; filename=\"fixed_broken.py\"").as_deref(),
            Some("fixed_broken.py")
        );
        assert_eq!(
            attachment_filename("attachment;filename=plain.py").as_deref(),
            Some("plain.py")
        );
        assert_eq!(attachment_filename("attachment"), None);
        assert_eq!(attachment_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = Client::new("http://127.0.0.1:7810/", None);
        assert_eq!(client.base_url, "http://127.0.0.1:7810");
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let router = Router::new()
            .route(
                "/sessions/missing",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(serde_json::json!({ "error": "session not found: missing" })),
                    )
                }),
            )
            .route(
                "/sessions/locked",
                get(|| async {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({ "error": "missing auth token" })),
                    )
                }),
            );
        let client = Client::new(&spawn(router).await, None);

        let err = client.get_session("missing").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(ref m) if m.contains("missing")));

        let err = client.get_session("locked").await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
    }

    #[tokio::test]
    async fn download_reads_disposition_and_body() {
        let router = Router::new().route(
            "/sessions/abc/download",
            get(|| async {
                (
                    [
                        ("content-type", "text/plain"),
                        ("content-disposition", "attachment; filename=\"fixed_job.py\""),
                    ],
                    "print('ok')",
                )
            }),
        );
        let client = Client::new(&spawn(router).await, Some("tok"));

        let download = client.download("abc").await.unwrap();
        assert_eq!(
            download,
            Download {
                filename: Some("fixed_job.py".to_string()),
                source: "print('ok')".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_daemon_is_not_ready() {
        // Port 9 (discard) is not served locally.
        let client = Client::new("http://127.0.0.1:9", None);
        let err = client.wait_for_ready_with_timeout(0).await.unwrap_err();
        assert!(matches!(err, ClientError::DaemonNotReady { timeout_ms: 0, .. }));
    }
}
