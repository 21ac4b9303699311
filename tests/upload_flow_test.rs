use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use ifc_upload_cli::api::ApiClient;
use ifc_upload_cli::config::ClientConfig;
use ifc_upload_cli::error::{HistoryError, UploadError};
use ifc_upload_cli::history::HistoryEntry;
use ifc_upload_cli::ui;
use ifc_upload_cli::upload::{UploadOutcome, Uploader};
use ifc_upload_cli::view::UploadView;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct ServerState {
    chunk_size: u64,
    chunks_total: u64,
    reject_chunk: Option<u64>,
    chunks: BTreeMap<u64, Vec<u8>>,
    assembled: Option<Vec<u8>>,
    upload_requests: usize,
    history: HashSet<u64>,
    logged_out: bool,
}

type Shared = Arc<Mutex<ServerState>>;

fn csrf_ok(headers: &HeaderMap) -> bool {
    headers.get("X-CSRFToken").and_then(|v| v.to_str().ok()) == Some(TOKEN)
}

fn csrf_failure() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html("<!doctype html><title>400 Bad Request</title><p>The CSRF token is invalid.</p>"),
    )
        .into_response()
}

async fn index() -> Html<String> {
    Html(format!(
        r#"<!doctype html><html><head><meta name="csrf-token" content="{}"></head><body></body></html>"#,
        TOKEN
    ))
}

async fn start_upload(State(state): State<Shared>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if !csrf_ok(&headers) {
        return csrf_failure();
    }
    let mut size = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or_default().to_string();
            if !name.to_lowercase().ends_with(".ifc") {
                return Json(json!({ "error": "invalid file type" })).into_response();
            }
            size = Some(field.bytes().await.unwrap().len() as u64);
        }
    }
    let Some(size) = size else {
        return Json(json!({ "error": "no file" })).into_response();
    };

    let mut s = state.lock().unwrap();
    s.upload_requests += 1;
    s.chunks.clear();
    s.chunks_total = size.div_ceil(s.chunk_size).max(1);
    Json(json!({
        "upload_id": "abc",
        "chunk_size": s.chunk_size,
        "chunks_total": s.chunks_total,
    }))
    .into_response()
}

async fn upload_chunk(
    State(state): State<Shared>,
    Path((upload_id, number)): Path<(String, u64)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !csrf_ok(&headers) {
        return csrf_failure();
    }
    if upload_id != "abc" {
        return Json(json!({ "error": "unknown upload" })).into_response();
    }
    let mut data = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("chunk") {
            data = Some(field.bytes().await.unwrap().to_vec());
        }
    }

    let mut s = state.lock().unwrap();
    if s.reject_chunk == Some(number) {
        return Json(json!({ "error": "chunk rejected" })).into_response();
    }
    s.chunks.insert(number, data.unwrap_or_default());
    if s.chunks.len() as u64 == s.chunks_total {
        let assembled = s.chunks.values().flatten().copied().collect();
        s.assembled = Some(assembled);
        return Json(json!({ "status": "completed", "redirect": "/preview/42" })).into_response();
    }
    Json(json!({ "status": "received" })).into_response()
}

async fn delete_history(State(state): State<Shared>, Path(id): Path<u64>, headers: HeaderMap) -> Response {
    if !csrf_ok(&headers) {
        return csrf_failure();
    }
    let mut s = state.lock().unwrap();
    if s.history.remove(&id) {
        Json(json!({ "success": true })).into_response()
    } else {
        Json(json!({ "error": "history not found" })).into_response()
    }
}

async fn history_page(State(state): State<Shared>) -> Response {
    let s = state.lock().unwrap();
    if s.logged_out {
        return Redirect::to("/auth/login?next=%2Fhistory").into_response();
    }
    if s.history.is_empty() {
        return Html(r#"<div class="card-body"><div class="alert alert-info">No history yet.</div></div>"#.to_string())
            .into_response();
    }
    let mut ids: Vec<u64> = s.history.iter().copied().collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    let rows: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<tr data-history-id="{id}"><td><a href="" class="history-filename" data-history-id="{id}">model-{id}.ifc</a></td><td><span class="badge history-status">completed</span></td></tr>"#
            )
        })
        .collect();
    Html(format!(
        r#"<table class="history-table"><thead><tr><th>File</th><th>Status</th></tr></thead><tbody>{rows}</tbody></table>"#
    ))
    .into_response()
}

async fn login_page() -> Html<&'static str> {
    Html(r#"<form method="post"><input type="hidden" name="csrf_token" value="form-token"></form>"#)
}

async fn spawn_server(state: ServerState) -> (String, Shared) {
    let shared = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/", get(index))
        .route("/upload", post(start_upload))
        .route("/upload/:id/chunk/:number", post(upload_chunk))
        .route("/history", get(history_page))
        .route("/history/:id/delete", post(delete_history))
        .route("/auth/login", get(login_page))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), shared)
}

#[derive(Default)]
struct QuietView {
    errors: Mutex<Vec<String>>,
    navigations: Mutex<Vec<String>>,
    progress: Mutex<Vec<u64>>,
    reloads: Mutex<usize>,
}

impl UploadView for QuietView {
    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
    fn clear_error(&self) {}
    fn set_busy(&self, _busy: bool) {}
    fn start_progress(&self, _total: u64) {}
    fn report_progress(&self, completed: u64, _total: u64) {
        self.progress.lock().unwrap().push(completed);
    }
    fn hide_progress(&self) {}
    fn navigate(&self, location: &str) {
        self.navigations.lock().unwrap().push(location.to_string());
    }
    fn reload(&self) {
        *self.reloads.lock().unwrap() += 1;
    }
}

fn config(server_url: &str, csrf_token: Option<&str>) -> ClientConfig {
    ClientConfig {
        server_url: server_url.to_string(),
        csrf_token: csrf_token.map(str::to_string),
        max_in_flight: 2,
        ..ClientConfig::default()
    }
}

fn model_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

#[tokio::test]
async fn test_chunked_upload_flow() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 1000,
        ..ServerState::default()
    })
    .await;
    let cfg = config(&url, None);
    let api = ApiClient::from_config(&cfg).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.ifc");
    let data = model_bytes(2500);
    std::fs::write(&path, &data).unwrap();

    let mut uploader = Uploader::new(api, QuietView::default(), &cfg);
    uploader.select_file(&path).unwrap();
    let outcome = uploader.submit_upload().await;

    match outcome {
        UploadOutcome::Completed { redirect } => assert_eq!(redirect, "/preview/42"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(*uploader.view().navigations.lock().unwrap(), vec!["/preview/42".to_string()]);
    assert_eq!(uploader.view().progress.lock().unwrap().last(), Some(&3));

    let s = server.lock().unwrap();
    assert_eq!(s.chunks.len(), 3);
    assert_eq!(s.chunks[&0].len(), 1000);
    assert_eq!(s.chunks[&1].len(), 1000);
    assert_eq!(s.chunks[&2].len(), 500);
    assert_eq!(s.assembled.as_deref(), Some(&data[..]));
}

#[tokio::test]
async fn test_non_ifc_file_is_never_sent() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 1000,
        ..ServerState::default()
    })
    .await;
    let cfg = config(&url, Some(TOKEN));
    let api = ApiClient::from_config(&cfg).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.txt");
    std::fs::write(&path, b"not a model").unwrap();

    let mut uploader = Uploader::new(api, QuietView::default(), &cfg);
    assert!(uploader.select_file(&path).is_err());
    assert!(!uploader.submit_upload().await.is_completed());

    assert_eq!(
        uploader.view().errors.lock().unwrap()[0],
        "only IFC files are accepted"
    );
    assert_eq!(server.lock().unwrap().upload_requests, 0);
}

#[tokio::test]
async fn test_rejected_chunk_stops_upload() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 100,
        reject_chunk: Some(1),
        ..ServerState::default()
    })
    .await;
    let cfg = ClientConfig {
        max_in_flight: 1,
        ..config(&url, Some(TOKEN))
    };
    let api = ApiClient::from_config(&cfg).unwrap();

    let mut uploader = Uploader::new(api, QuietView::default(), &cfg);
    uploader.select_bytes("wall.ifc", model_bytes(450)).unwrap();
    let outcome = uploader.submit_upload().await;

    assert!(matches!(outcome, UploadOutcome::Failed(UploadError::ChunkTransfer(ref m)) if m == "chunk rejected"));
    assert_eq!(*uploader.view().errors.lock().unwrap(), vec!["chunk rejected".to_string()]);
    assert!(uploader.view().navigations.lock().unwrap().is_empty());
    // sequential window: nothing after the failing chunk was sent
    let s = server.lock().unwrap();
    assert_eq!(s.chunks.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert!(s.assembled.is_none());
}

#[tokio::test]
async fn test_stale_token_reloads_then_succeeds() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 64,
        ..ServerState::default()
    })
    .await;
    let cfg = config(&url, Some("stale-token"));
    let api = ApiClient::from_config(&cfg).unwrap();

    let mut uploader = Uploader::new(api, QuietView::default(), &cfg);
    uploader.select_bytes("site.IFC", model_bytes(200)).unwrap();
    let first = uploader.submit_upload().await;
    assert!(matches!(first, UploadOutcome::SessionExpired));
    assert_eq!(*uploader.view().reloads.lock().unwrap(), 1);
    assert!(uploader.view().errors.lock().unwrap().is_empty());

    // the reload fetched a fresh token from the index page
    uploader.select_bytes("site.IFC", model_bytes(200)).unwrap();
    let second = uploader.submit_upload().await;
    assert!(second.is_completed());
    assert_eq!(server.lock().unwrap().chunks.len(), 4);
}

#[tokio::test]
async fn test_delete_history_entry() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 1000,
        history: [7, 8].into_iter().collect(),
        ..ServerState::default()
    })
    .await;
    let api = ApiClient::from_config(&config(&url, None)).unwrap();

    api.delete_history(7).await.unwrap();
    assert!(!server.lock().unwrap().history.contains(&7));

    match api.delete_history(99).await {
        Err(HistoryError::Rejected(msg)) => assert_eq!(msg, "history not found"),
        other => panic!("unexpected result {other:?}"),
    }

    let stale = ApiClient::from_config(&config(&url, Some("stale-token"))).unwrap();
    assert!(matches!(stale.delete_history(8).await, Err(HistoryError::SessionExpired)));
    assert!(server.lock().unwrap().history.contains(&8));
}

#[tokio::test]
async fn test_list_history_then_delete() {
    let (url, server) = spawn_server(ServerState {
        chunk_size: 1000,
        history: [3, 11].into_iter().collect(),
        ..ServerState::default()
    })
    .await;
    let api = ApiClient::from_config(&config(&url, None)).unwrap();

    let entries = api.list_history().await.unwrap();
    assert_eq!(
        entries,
        vec![
            HistoryEntry {
                id: 11,
                filename: "model-11.ifc".into(),
                status: Some("completed".into()),
            },
            HistoryEntry {
                id: 3,
                filename: "model-3.ifc".into(),
                status: Some("completed".into()),
            },
        ]
    );

    for entry in &entries {
        api.delete_history(entry.id).await.unwrap();
    }
    assert!(api.list_history().await.unwrap().is_empty());
    // the empty state is reported, not treated as a failure
    assert_eq!(ui::show_history(&api).await, Some(Vec::new()));

    server.lock().unwrap().logged_out = true;
    assert!(matches!(api.list_history().await, Err(HistoryError::SessionExpired)));
    assert_eq!(ui::show_history(&api).await, None);
}
