//! The receiver's HTTP control surface: a small set of endpoints the sender
//! drives to walk, diff, and mutate the destination tree.
//!
//! Every response is the same JSON envelope — `{"status":"success","result":
//! ...}` or `{"status":"error","result":<message>}` — with the HTTP status
//! carried by [`crate::error::SyncError::status_code`]. Path parameters are
//! extracted from the raw request URI rather than axum's `Path` extractor so
//! that percent-decoding happens exactly once, inside [`safe_path::resolve`].

use crate::delta::{self, BlockTable, PatchSession};
use crate::error::SyncError;
use crate::safe_path;
use crate::tree::{self, IdentifierKind};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppState {
    root: Arc<Mutex<PathBuf>>,
    sessions: Arc<Mutex<HashMap<String, PatchSession>>>,
}

impl AppState {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(Mutex::new(root)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn root_dir(&self) -> PathBuf {
        self.root.lock().expect("root mutex poisoned").clone()
    }
}

/// Wraps a [`SyncError`] so it can be returned directly from a handler.
struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({"status": "error", "result": self.0.to_string()}));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn ok(result: Value) -> Json<Value> {
    Json(json!({"status": "success", "result": result}))
}

/// Build the router. Unknown paths fall through to [`not_found`], matching
/// the 404 JSON envelope the external interface promises.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/directory_tree_size_and_mtime", get(directory_tree_size_and_mtime))
        .route("/directory_tree_checksum", get(directory_tree_checksum))
        .route("/block_checksums/*rel", get(block_checksums))
        .route("/create_directory/*rel", post(create_directory))
        .route("/create_or_append_file/*rel", post(create_or_append_file))
        .route("/create_or_append_patch/*tail", post(create_or_append_patch))
        .route("/finish_patch/*tail", post(finish_patch))
        .route("/update_file_mtime/*rel", post(update_file_mtime))
        .route("/delete_file_or_directory/*rel", post(delete_file_or_directory))
        .route("/ios_select_directory", post(ios_select_directory))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> Response {
    let body = Json(json!({"status": "error", "result": "unknown endpoint"}));
    (StatusCode::NOT_FOUND, body).into_response()
}

/// Strip a literal route prefix from a request's raw path, returning the
/// still-percent-encoded tail exactly as the client sent it.
fn tail_after<'a>(uri: &'a Uri, prefix: &str) -> &'a str {
    uri.path().strip_prefix(prefix).unwrap_or("")
}

async fn directory_tree_size_and_mtime(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = tree::snapshot(&state.root_dir(), IdentifierKind::SizeMtime)?;
    Ok(ok(tree::to_json(&snapshot)))
}

async fn directory_tree_checksum(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = tree::snapshot(&state.root_dir(), IdentifierKind::Checksum)?;
    Ok(ok(tree::to_json(&snapshot)))
}

async fn block_checksums(State(state): State<AppState>, uri: Uri) -> ApiResult<Json<Value>> {
    let rel = tail_after(&uri, "/block_checksums/");
    let path = safe_path::resolve(rel, &state.root_dir())?;
    let table = delta::compute_table(&path)?;
    Ok(ok(block_table_to_json(&table)))
}

fn block_table_to_json(table: &BlockTable) -> Value {
    let rolling: Vec<Value> = table.blocks.iter().map(|b| json!(b.rolling)).collect();
    let strong: Vec<Value> = table.blocks.iter().map(|b| json!(b.strong)).collect();
    json!([rolling, strong])
}

async fn create_directory(State(state): State<AppState>, uri: Uri) -> ApiResult<Json<Value>> {
    let rel = tail_after(&uri, "/create_directory/");
    let path = safe_path::resolve(rel, &state.root_dir())?;
    if let Ok(metadata) = std::fs::metadata(&path) {
        if !metadata.is_dir() {
            std::fs::remove_file(&path).map_err(|e| SyncError::io(&path, e))?;
        }
    }
    std::fs::create_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
    tracing::debug!(path = %path.display(), "created directory");
    Ok(ok(Value::Null))
}

async fn create_or_append_file(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let rel = tail_after(&uri, "/create_or_append_file/");
    let path = safe_path::resolve(rel, &state.root_dir())?;
    delta::create_or_append_file(&path, &body)?;
    tracing::debug!(path = %path.display(), bytes = body.len(), "appended to file");
    Ok(ok(Value::Null))
}

/// Split a two-parameter wildcard tail (`<suffix>/<rel>`) the way the
/// original reference does: on the first literal slash, leaving `rel` free
/// to contain further slashes of its own.
fn split_suffix_and_rel(tail: &str) -> ApiResult<(&str, &str)> {
    match tail.split_once('/') {
        Some((suffix, rel)) => Ok((suffix, rel)),
        None => Err(SyncError::Protocol(format!("malformed suffix/rel path: {tail}")).into()),
    }
}

fn side_path_for(target: &std::path::Path, suffix: &str) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| std::path::Path::new("."));
    parent.join(format!(".sy-tmp-{suffix}"))
}

async fn create_or_append_patch(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let tail = tail_after(&uri, "/create_or_append_patch/");
    let (suffix, rel) = split_suffix_and_rel(tail)?;
    let target = safe_path::resolve(rel, &state.root_dir())?;

    let mut sessions = state.sessions.lock().expect("sessions mutex poisoned");
    if !sessions.contains_key(suffix) {
        let side = side_path_for(&target, suffix);
        let session = PatchSession::start(&target, &side)?;
        sessions.insert(suffix.to_string(), session);
    }
    let session = sessions.get_mut(suffix).expect("just inserted");
    session.feed(&body)?;
    tracing::debug!(%suffix, bytes = body.len(), "fed patch chunk");
    Ok(ok(Value::Null))
}

async fn finish_patch(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let tail = tail_after(&uri, "/finish_patch/");
    let (suffix, _rel) = split_suffix_and_rel(tail)?;
    let mtime_ns = parse_ascii_mtime(&body)?;

    let session = {
        let mut sessions = state.sessions.lock().expect("sessions mutex poisoned");
        sessions
            .remove(suffix)
            .ok_or_else(|| SyncError::Protocol(format!("no in-flight patch for suffix {suffix}")))?
    };
    session.finish(mtime_ns)?;
    tracing::info!(%suffix, "patch applied");
    Ok(ok(Value::Null))
}

async fn update_file_mtime(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let rel = tail_after(&uri, "/update_file_mtime/");
    let path = safe_path::resolve(rel, &state.root_dir())?;
    let mtime_ns = parse_ascii_mtime(&body)?;
    delta::set_mtime_ns(&path, mtime_ns)?;
    tracing::debug!(path = %path.display(), mtime_ns, "updated mtime");
    Ok(ok(Value::Null))
}

async fn delete_file_or_directory(State(state): State<AppState>, uri: Uri) -> ApiResult<Json<Value>> {
    let rel = tail_after(&uri, "/delete_file_or_directory/");
    let path = safe_path::resolve(rel, &state.root_dir())?;
    let metadata = std::fs::metadata(&path).map_err(|e| SyncError::io(&path, e))?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
    } else {
        std::fs::remove_file(&path).map_err(|e| SyncError::io(&path, e))?;
    }
    tracing::info!(path = %path.display(), "deleted");
    Ok(ok(Value::Null))
}

/// Optional root rebinding: the request body is a UTF-8 absolute path to an
/// existing directory, which becomes the new root for all subsequent
/// requests. The interactive directory-picker prompt itself is platform UI
/// and stays outside this crate; this endpoint is the rebinding hook it
/// would call into.
async fn ios_select_directory(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let candidate = std::str::from_utf8(&body)
        .map_err(|_| SyncError::Protocol("root path is not valid UTF-8".into()))?
        .trim();
    let candidate = PathBuf::from(candidate);
    let metadata = std::fs::metadata(&candidate).map_err(|e| SyncError::io(&candidate, e))?;
    if !metadata.is_dir() {
        return Err(SyncError::Config(format!("{} is not a directory", candidate.display())).into());
    }

    let mut root = state.root.lock().expect("root mutex poisoned");
    *root = candidate.clone();
    tracing::info!(root = %candidate.display(), "rebound destination root");
    Ok(ok(json!(candidate.to_string_lossy())))
}

fn parse_ascii_mtime(body: &[u8]) -> Result<u128, SyncError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| SyncError::Protocol("mtime body is not valid UTF-8".into()))?
        .trim();
    text.parse()
        .map_err(|_| SyncError::Protocol(format!("mtime body is not a decimal integer: {text}")))
}

/// Load the configured root for `sy-receive`: the positional target path,
/// created if absent (a fresh destination directory is a legitimate start
/// state — every action plan against an empty tree begins with creates).
pub fn prepare_root(target: &std::path::Path) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(target).map_err(|e| SyncError::io(target, e))?;
    target.canonicalize().map_err(|e| SyncError::io(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn state_over(dir: &std::path::Path) -> AppState {
        AppState::new(dir.to_path_buf())
    }

    async fn send(app: Router, method: Method, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn unknown_endpoint_is_404_with_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(state_over(dir.path()));
        let (status, body) = send(app, Method::GET, "/nonexistent", Vec::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn path_escape_is_rejected_with_no_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(state_over(dir.path()));
        let (status, body) = send(
            app,
            Method::POST,
            "/create_or_append_file/..%2f..%2fescaped.txt",
            b"x".to_vec(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(!dir.path().parent().unwrap().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn create_directory_then_tree_snapshot_reflects_it() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(state_over(dir.path()));
        let (status, _) = send(app.clone(), Method::POST, "/create_directory/sub", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(dir.path().join("sub").is_dir());

        let (status, body) = send(app, Method::GET, "/directory_tree_size_and_mtime", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"]["sub"].is_object());
    }

    #[tokio::test]
    async fn create_or_append_file_then_update_mtime_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(state_over(dir.path()));
        let (status, _) =
            send(app.clone(), Method::POST, "/create_or_append_file/a.txt", b"hello".to_vec()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            app,
            Method::POST,
            "/update_file_mtime/a.txt",
            b"1600000000000000000".to_vec(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let content = std::fs::read(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn patch_session_round_trips_across_two_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"AAAABBBB").unwrap();
        let app = app(state_over(dir.path()));

        let mut first_chunk = Vec::new();
        first_chunk.extend_from_slice(&0i64.to_le_bytes());
        let (status, _) = send(
            app.clone(),
            Method::POST,
            "/create_or_append_patch/xyz/f.bin",
            first_chunk,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut second_chunk = Vec::new();
        let literal = b"CCCC";
        second_chunk.extend_from_slice(&(literal.len() as i64).to_le_bytes());
        second_chunk.extend_from_slice(literal);
        let (status, _) = send(
            app.clone(),
            Method::POST,
            "/create_or_append_patch/xyz/f.bin",
            second_chunk,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app, Method::POST, "/finish_patch/xyz/f.bin", b"123".to_vec()).await;
        assert_eq!(status, StatusCode::OK);

        let content = std::fs::read(dir.path().join("f.bin")).unwrap();
        assert_eq!(content, b"AAAABBBBCCCC");
    }

    #[tokio::test]
    async fn delete_file_or_directory_removes_both_kinds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/inner"), b"y").unwrap();
        let app = app(state_over(dir.path()));

        let (status, _) = send(app.clone(), Method::POST, "/delete_file_or_directory/a.txt", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!dir.path().join("a.txt").exists());

        let (status, _) = send(app, Method::POST, "/delete_file_or_directory/d", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn ios_select_directory_rebinds_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("marker.txt"), b"here").unwrap();
        let app = app(state_over(dir.path()));

        let new_root = other.path().to_string_lossy().into_owned();
        let (status, _) = send(app.clone(), Method::POST, "/ios_select_directory", new_root.into_bytes()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, Method::GET, "/directory_tree_size_and_mtime", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"]["marker.txt"].is_array());
    }
}
