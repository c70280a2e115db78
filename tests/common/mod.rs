//! Stub identity provider and backend for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Base URL of a port nothing listens on
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── Identity provider ──────────────────────────────────────────────────────

/// How the stub answers refresh requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// `RT1` → `AT2`/`RT2`, `RT2` → `AT3`/`RT3`
    Rotate,
    /// New access token only, no refresh token in the response
    AccessOnly,
    /// Always 400
    Reject,
}

/// Recorded stub identity provider state
pub struct StubIdp {
    pub password_calls: AtomicUsize,
    pub pkce_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub refresh_mode: RwLock<RefreshMode>,
    pub last_verifier: RwLock<Option<String>>,
    pub last_apikey: RwLock<Option<String>>,
}

impl StubIdp {
    pub fn new(refresh_mode: RefreshMode) -> Arc<Self> {
        Arc::new(Self {
            password_calls: AtomicUsize::new(0),
            pkce_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_mode: RwLock::new(refresh_mode),
            last_verifier: RwLock::new(None),
            last_apikey: RwLock::new(None),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

/// Start the stub identity provider
pub async fn spawn_idp(idp: Arc<StubIdp>) -> String {
    let router = Router::new()
        .route("/auth/v1/token", post(idp_token))
        .with_state(idp);
    spawn(router).await
}

async fn idp_token(
    State(idp): State<Arc<StubIdp>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    *idp.last_apikey.write() = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let field = |key: &str| body.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    match query.get("grant_type").map(String::as_str) {
        Some("password") => {
            idp.password_calls.fetch_add(1, Ordering::SeqCst);
            match (field("email").as_str(), field("password").as_str()) {
                ("a@b.com", "pw") => Json(json!({
                    "access_token": "AT1",
                    "refresh_token": "RT1",
                    "user": {"id": "user-1", "email": "a@b.com"}
                }))
                .into_response(),
                ("no@tokens.com", _) => Json(json!({"access_token": "AT1"})).into_response(),
                _ => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
                )
                    .into_response(),
            }
        }
        Some("pkce") => {
            idp.pkce_calls.fetch_add(1, Ordering::SeqCst);
            *idp.last_verifier.write() = Some(field("code_verifier"));
            if field("auth_code") == "good-code" {
                Json(json!({
                    "access_token": "AT-fed",
                    "refresh_token": "RT-fed",
                    "user": {"id": "user-42", "email": "fed@example.com"}
                }))
                .into_response()
            } else {
                (StatusCode::BAD_REQUEST, Json(json!({"error_description": "invalid flow state"})))
                    .into_response()
            }
        }
        Some("refresh_token") => {
            idp.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let mode = *idp.refresh_mode.read();
            match (mode, field("refresh_token").as_str()) {
                (RefreshMode::Rotate, "RT1") => {
                    Json(json!({"access_token": "AT2", "refresh_token": "RT2"})).into_response()
                }
                (RefreshMode::Rotate, "RT2") => {
                    Json(json!({"access_token": "AT3", "refresh_token": "RT3"})).into_response()
                }
                (RefreshMode::AccessOnly, _) => Json(json!({"access_token": "AT2"})).into_response(),
                _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response(),
            }
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

// ── Backend ────────────────────────────────────────────────────────────────

/// Secret key `select-project` stores for `pro_1`
pub const PROJECT_SECRET: &str = "sk_test_sec1";

/// Recorded stub backend state
pub struct StubBackend {
    /// Bearer the backend currently accepts
    pub valid_token: RwLock<String>,
    /// Every bearer seen, in order
    pub seen_tokens: RwLock<Vec<String>>,
    /// Headers of the last request
    pub last_headers: RwLock<HeaderMap>,
    /// Bodies of `PUT /project/apikey`, with the `project` header
    pub apikey_updates: RwLock<Vec<(String, Value)>>,
}

impl StubBackend {
    pub fn new(valid_token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: RwLock::new(valid_token.to_string()),
            seen_tokens: RwLock::new(Vec::new()),
            last_headers: RwLock::new(HeaderMap::new()),
            apikey_updates: RwLock::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen_tokens.read().clone()
    }
}

/// Start the stub backend
pub async fn spawn_backend(backend: Arc<StubBackend>) -> String {
    let router = Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{id}", get(get_project))
        .route("/project/apikey", post(create_key).put(record_key))
        .route("/register", post(shield_register))
        .route("/not-json", get(not_json))
        .route("/broken", get(broken))
        .fallback(project_echo)
        .with_state(backend);
    spawn(router).await
}

/// Check the bearer, returning the 401 response on mismatch
fn authorize(backend: &StubBackend, headers: &HeaderMap) -> Result<(), Response> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    backend.seen_tokens.write().push(bearer.clone());
    *backend.last_headers.write() = headers.clone();

    if bearer == *backend.valid_token.read() {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid token"}))).into_response())
    }
}

async fn list_projects(State(backend): State<Arc<StubBackend>>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    Json(json!({"data": [{"id": "pro_1", "name": "Demo"}]})).into_response()
}

async fn create_project(
    State(backend): State<Arc<StubBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    Json(json!({"id": "pro_new", "name": body["name"]})).into_response()
}

async fn get_project(
    State(backend): State<Arc<StubBackend>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    match id.as_str() {
        "pro_1" => Json(json!({
            "id": "pro_1",
            "name": "Demo",
            "apikeys": [
                {"name": "pk", "token": "pub1"},
                {"name": "sk", "token": "sec1"},
                {"name": "pk_shield", "token": "shield-pub"}
            ]
        }))
        .into_response(),
        "pro_nokeys" => Json(json!({"id": "pro_nokeys", "apikeys": []})).into_response(),
        _ => (StatusCode::NOT_FOUND, "project not found").into_response(),
    }
}

async fn create_key(
    State(backend): State<Arc<StubBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    let project = headers
        .get("project")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let kind = body["type"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "id": project,
        "apikeys": [
            {"name": kind, "token": "old"},
            {"name": kind, "token": "new"}
        ]
    }))
    .into_response()
}

async fn not_json(State(backend): State<Arc<StubBackend>>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    (StatusCode::OK, "plain text, not json").into_response()
}

async fn broken(State(backend): State<Arc<StubBackend>>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded").into_response()
}

async fn record_key(
    State(backend): State<Arc<StubBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    let project = headers
        .get("project")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    backend.apikey_updates.write().push((project, body));
    Json(json!({"ok": true})).into_response()
}

async fn shield_register(
    State(backend): State<Arc<StubBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    if body["generate_encryption_key"] != json!(true) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({
        "api_key": format!("shield-pk-{}", body["name"].as_str().unwrap_or_default()),
        "api_secret": "shield-sk",
        "encryption_part": "enc-part"
    }))
    .into_response()
}

/// Project-scoped resources: echo the request back when the project secret
/// is presented
async fn project_echo(
    State(backend): State<Arc<StubBackend>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    backend.seen_tokens.write().push(bearer.clone());

    if bearer != PROJECT_SECRET {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API key"}))).into_response();
    }
    if uri.path().ends_with("/missing") {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query().unwrap_or_default(),
        "body": body
    }))
    .into_response()
}
