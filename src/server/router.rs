//! HTTP router and handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::Error;
use crate::oauth::{
    AuthFlow, AuthorizationRequest, ClientMetadata, ClientRegistry, InMemoryGrants, PasswordForm,
    Reaped, TokenRequest,
};
use crate::tools::{self, ToolSession, Toolbox};

/// Shared application state
pub struct AppState {
    /// Authorization flow controller
    pub flow: AuthFlow,
    /// Registered MCP clients
    pub clients: Arc<ClientRegistry>,
    /// Grant store behind the flow's completion port
    pub grants: Arc<InMemoryGrants>,
    /// Project management tools
    pub toolbox: Toolbox,
    /// Tool state per bearer token
    pub tool_sessions: DashMap<String, Arc<ToolSession>>,
    /// Origin used to build the federated callback URL
    pub public_url: Option<String>,
}

impl AppState {
    /// Create application state
    pub fn new(
        flow: AuthFlow,
        clients: Arc<ClientRegistry>,
        grants: Arc<InMemoryGrants>,
        toolbox: Toolbox,
        public_url: Option<String>,
    ) -> Self {
        Self {
            flow,
            clients,
            grants,
            toolbox,
            tool_sessions: DashMap::new(),
            public_url,
        }
    }

    /// Public origin, from configuration or the request's `Host` header
    fn public_url(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(url) = &self.public_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        let host = headers.get(header::HOST)?.to_str().ok()?;
        let scheme = if self.flow.secure_cookies() { "https" } else { "http" };
        Some(format!("{scheme}://{host}"))
    }

    /// Tool session for a live bearer token issued by `POST /token`
    fn tool_session(&self, bearer: &str) -> Option<Arc<ToolSession>> {
        let Some(granted) = self.grants.session(bearer) else {
            self.tool_sessions.remove(bearer);
            return None;
        };
        let session = self
            .tool_sessions
            .entry(bearer.to_string())
            .or_insert_with(|| Arc::new(ToolSession::new(granted.credential)));
        Some(Arc::clone(session.value()))
    }

    /// Drop expired grants along with the tool state of expired sessions
    pub fn reap_expired(&self) -> Reaped {
        let reaped = self.grants.reap_expired();
        for bearer in &reaped.bearers {
            self.tool_sessions.remove(bearer);
        }
        reaped
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata_handler),
        )
        .route("/register", post(register_handler))
        .route("/authorize", get(authorize_page).post(authorize_submit))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/{provider}", get(oauth_provider))
        .route("/token", post(token_handler))
        .route("/tools", get(tools_list_handler))
        .route("/tools/call", post(tools_call_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /.well-known/oauth-authorization-server - RFC 8414 metadata
async fn metadata_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(issuer) = state.public_url(&headers) else {
        return Error::InvalidRequest("cannot determine issuer origin".to_string()).into_response();
    };

    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "registration_endpoint": format!("{issuer}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post", "client_secret_basic"],
        "code_challenge_methods_supported": ["S256", "plain"],
    }))
    .into_response()
}

/// POST /register - dynamic client registration
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(metadata): Json<ClientMetadata>,
) -> Response {
    match state.clients.register(metadata) {
        Ok(client) => (
            StatusCode::CREATED,
            [(header::CACHE_CONTROL, "no-store")],
            Json(client),
        )
            .into_response(),
        Err(e) => {
            debug!(error = %e.error, description = %e.description, "Client registration rejected");
            e.into_response()
        }
    }
}

/// GET /authorize - render the credential form
async fn authorize_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result = AuthorizationRequest::from_query(&params)
        .and_then(|request| state.flow.begin_authorization(jar, request));

    match result {
        Ok((jar, page)) => (jar, Html(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /authorize - password grant
async fn authorize_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> Response {
    let (jar, result) = state.flow.complete_password_grant(jar, form).await;
    match result {
        Ok(redirect_to) => (jar, Redirect::to(&redirect_to)).into_response(),
        Err(e) => (jar, e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /oauth/callback - PKCE code exchange
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = &query.error {
        warn!(error = %error, "Federated provider returned an error");
    }

    let (jar, result) = state.flow.complete_federated_callback(jar, query.code).await;
    match result {
        Ok(redirect_to) => (jar, found(&redirect_to)).into_response(),
        Err(Error::InvalidRequest(_)) if query.error.is_some() => {
            let message = query.error_description.or(query.error).unwrap_or_default();
            (jar, Error::TokenExchangeFailed(message)).into_response()
        }
        Err(e) => (jar, e).into_response(),
    }
}

/// GET /oauth/{provider} - start a federated login
async fn oauth_provider(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(public_url) = state.public_url(&headers) else {
        return Error::InvalidRequest("cannot determine callback origin".to_string()).into_response();
    };

    match state.flow.begin_federated_login(jar, &provider, &public_url) {
        Ok((jar, url)) => (jar, found(&url)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /token - redeem an authorization code
async fn token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(mut request): Form<TokenRequest>,
) -> Response {
    // client_secret_basic takes precedence over form fields
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        request.client_id = Some(client_id);
        request.client_secret = Some(client_secret);
    }

    match state.grants.redeem_code(request) {
        Ok(token) => (
            [(header::CACHE_CONTROL, "no-store")],
            Json(token),
        )
            .into_response(),
        Err(e) => {
            debug!(error = %e.error, description = %e.description, "Token request rejected");
            e.into_response()
        }
    }
}

/// GET /tools - tool definitions
async fn tools_list_handler() -> impl IntoResponse {
    Json(json!({ "tools": tools::definitions() }))
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// POST /tools/call - run a tool for the bearer's session
async fn tools_call_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(call): Json<ToolCall>,
) -> Response {
    let session = bearer_token(&headers).and_then(|bearer| state.tool_session(bearer));
    let Some(session) = session else {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(json!({"error": "invalid_token", "error_description": "Missing or unknown bearer token"})),
        )
            .into_response();
    };

    Json(state.toolbox.call(&session, &call.name, &call.arguments).await).into_response()
}

/// Client id and secret from an `Authorization: Basic` header
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;
    Some((client_id.to_string(), client_secret.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `302 Found` to `location`
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
