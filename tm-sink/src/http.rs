//! Upload endpoint (§4.6 point 4, §6): `PUT /tool-data/:ctx/:host` and
//! `PUT /sysinfo-data/:ctx/:host`, one handler parameterized by URI kind.

use crate::state::TdsState;
use crate::tracker::Tracker;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tm_core::packaging;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// State shared between the HTTP server task and the bus-watcher task
/// (§5: "TDS tracking map and state: exclusive under TDS lock").
pub struct SinkState {
    pub tracker: Tracker,
    pub state: Mutex<TdsState>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

enum AppError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Clone, Copy)]
enum UriKind {
    ToolData,
    SysinfoData,
}

pub fn router(state: Arc<SinkState>) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/tool-data/:ctx/:host", put(upload_tool_data))
        .route("/sysinfo-data/:ctx/:host", put(upload_sysinfo_data))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn upload_tool_data(
    state: State<Arc<SinkState>>,
    path: Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    handle_upload(state, path, headers, body, UriKind::ToolData).await
}

async fn upload_sysinfo_data(
    state: State<Arc<SinkState>>,
    path: Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    handle_upload(state, path, headers, body, UriKind::SysinfoData).await
}

async fn handle_upload(
    State(state): State<Arc<SinkState>>,
    Path((ctx, host)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    kind: UriKind,
) -> Result<StatusCode, AppError> {
    if body.len() > state.max_upload_bytes {
        return Err(AppError::BadRequest("upload exceeds maximum size".to_string()));
    }

    let directory = {
        let current = state.state.lock().unwrap();
        match (&*current, kind) {
            (TdsState::Send { directory }, UriKind::ToolData) => directory.clone(),
            (TdsState::Sysinfo { directory }, UriKind::SysinfoData) => directory.clone(),
            _ => return Err(AppError::BadRequest("sink is not accepting uploads in the current state".to_string())),
        }
    };

    if packaging::directory_token(&directory) != ctx {
        return Err(AppError::BadRequest("ctx does not match the active directory".to_string()));
    }

    if !state.tracker.knows_host(&host) {
        return Err(AppError::BadRequest(format!("unrecognized host '{host}'")));
    }
    if !state.tracker.is_waiting(&host) {
        return Err(AppError::BadRequest(format!("'{host}' is not currently expected to post data")));
    }

    if body.is_empty() {
        return Err(AppError::BadRequest("no data received".to_string()));
    }

    let md5sum = headers
        .get("HTTP_MD5SUM")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing HTTP_MD5SUM header".to_string()))?
        .to_string();

    let filename = headers
        .get("filename")
        .and_then(|v| v.to_str().ok())
        .map(sanitize_filename)
        .unwrap_or_else(|| format!("{host}.tar.xz"));

    let dest_dir = PathBuf::from(&directory);
    let archive_path = dest_dir.join(&filename);
    if archive_path.exists() {
        return Err(AppError::Conflict(format!("{filename} already uploaded")));
    }

    let digest = packaging::md5_hex(&body);
    if digest != md5sum {
        return Err(AppError::BadRequest("HTTP_MD5SUM does not match uploaded content".to_string()));
    }

    tokio::fs::write(&archive_path, &body)
        .await
        .map_err(|e| AppError::Internal(format!("failed to stage upload: {e}")))?;
    tokio::fs::write(
        archive_path.with_extension("md5"),
        format!("{digest}  {filename}\n"),
    )
    .await
    .map_err(|e| AppError::Internal(format!("failed to write md5 sidecar: {e}")))?;

    let extracted = packaging::extract_tar(&archive_path, &dest_dir).await;

    let _ = tokio::fs::remove_file(&archive_path).await;
    let _ = tokio::fs::remove_file(archive_path.with_extension("md5")).await;

    extracted.map_err(|e| AppError::Internal(format!("tar extraction failed: {e}")))?;

    state.tracker.mark_dormant(&host);
    Ok(StatusCode::OK)
}

fn sanitize_filename(raw: &str) -> String {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_core::model::ToolGroupStore;

    fn group_with_host(dir: &std::path::Path, host: &str) {
        let path = dir.join("tools-default").join(host).join("sar");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[tokio::test]
    async fn upload_rejected_when_not_in_send_state() {
        let dir = tempfile::tempdir().unwrap();
        group_with_host(dir.path(), "host-a");
        let group = ToolGroupStore::load(dir.path(), "default").unwrap();

        let state = Arc::new(SinkState {
            tracker: Tracker::from_group(&group, "controller"),
            state: Mutex::new(TdsState::Idle),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        });

        let result = handle_upload(
            State(state),
            Path(("deadbeef".to_string(), "host-a".to_string())),
            HeaderMap::new(),
            Bytes::new(),
            UriKind::ToolData,
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_rejected_on_ctx_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        group_with_host(dir.path(), "host-a");
        let group = ToolGroupStore::load(dir.path(), "default").unwrap();

        let state = Arc::new(SinkState {
            tracker: Tracker::from_group(&group, "controller"),
            state: Mutex::new(TdsState::Send {
                directory: "/run/1".to_string(),
            }),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        });

        let mut headers = HeaderMap::new();
        headers.insert("HTTP_MD5SUM", "irrelevant".parse().unwrap());

        let result = handle_upload(
            State(state),
            Path(("wrong-ctx".to_string(), "host-a".to_string())),
            headers,
            Bytes::new(),
            UriKind::ToolData,
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_rejected_on_md5_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        group_with_host(dir.path(), "host-a");
        let group = ToolGroupStore::load(dir.path(), "default").unwrap();
        let directory = dir.path().to_string_lossy().to_string();

        let tracker = Tracker::from_group(&group, "controller");
        tracker.mark_all_waiting();
        let state = Arc::new(SinkState {
            tracker,
            state: Mutex::new(TdsState::Send {
                directory: directory.clone(),
            }),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        });

        let mut headers = HeaderMap::new();
        headers.insert("HTTP_MD5SUM", "0000000000000000000000000000000".parse().unwrap());

        let result = handle_upload(
            State(state),
            Path((packaging::directory_token(&directory), "host-a".to_string())),
            headers,
            Bytes::from_static(b"not a real tarball"),
            UriKind::ToolData,
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_rejected_on_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        group_with_host(dir.path(), "host-a");
        let group = ToolGroupStore::load(dir.path(), "default").unwrap();
        let directory = dir.path().to_string_lossy().to_string();

        let tracker = Tracker::from_group(&group, "controller");
        tracker.mark_all_waiting();
        let state = Arc::new(SinkState {
            tracker,
            state: Mutex::new(TdsState::Send {
                directory: directory.clone(),
            }),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        });

        // md5 of the empty string, so a buggy implementation that checks
        // HTTP_MD5SUM before body length would let this slip through to
        // tar extraction instead of rejecting it up front.
        let mut headers = HeaderMap::new();
        headers.insert("HTTP_MD5SUM", "d41d8cd98f00b204e9800998ecf8427e".parse().unwrap());

        let result = handle_upload(
            State(state),
            Path((packaging::directory_token(&directory), "host-a".to_string())),
            headers,
            Bytes::new(),
            UriKind::ToolData,
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_rejected_when_host_not_waiting() {
        let dir = tempfile::tempdir().unwrap();
        group_with_host(dir.path(), "host-a");
        let group = ToolGroupStore::load(dir.path(), "default").unwrap();
        let directory = dir.path().to_string_lossy().to_string();

        // No mark_all_waiting: host-a is Dormant, so this PUT looks like a
        // duplicate or unexpected upload.
        let state = Arc::new(SinkState {
            tracker: Tracker::from_group(&group, "controller"),
            state: Mutex::new(TdsState::Send {
                directory: directory.clone(),
            }),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        });

        let mut headers = HeaderMap::new();
        headers.insert("HTTP_MD5SUM", "irrelevant".parse().unwrap());

        let result = handle_upload(
            State(state),
            Path((packaging::directory_token(&directory), "host-a".to_string())),
            headers,
            Bytes::from_static(b"some data"),
            UriKind::ToolData,
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
