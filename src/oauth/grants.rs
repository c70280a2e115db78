//! In-memory downstream completion port
//!
//! Turns a completed authorization into a one-time authorization code for
//! the MCP client, and redeems that code at `POST /token` for an opaque
//! bearer token bound to the session's [`SharedCredential`].
//!
//! Two `DashMap` indices:
//!
//! - `codes`:    authorization code → pending grant (single use, short TTL)
//! - `sessions`: bearer token → session credential cell (session TTL)
//!
//! Codes are only issued to clients in the [`ClientRegistry`], toward one of
//! their registered redirect URIs, and only that client can redeem them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

use super::clients::ClientRegistry;
use super::pkce;
use super::request::{CompleteAuthorization, CompletedAuthorization, CompletionPort};
use crate::credential::SharedCredential;
use crate::{Error, Result};

/// Form body of `POST /token`
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TokenRequest {
    /// Must be `authorization_code`
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Code from the authorization redirect
    #[serde(default)]
    pub code: Option<String>,
    /// Client the code was issued to
    #[serde(default)]
    pub client_id: Option<String>,
    /// Secret of a confidential client (`client_secret_post`)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Redirect URI used in the authorization request
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// PKCE verifier
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Successful `POST /token` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque bearer for tool calls
    pub access_token: String,
    /// Always `bearer`
    pub token_type: String,
    /// Space-separated granted scope
    pub scope: String,
    /// Seconds until the bearer expires
    pub expires_in: u64,
}

/// OAuth error returned by `POST /token` and `POST /register`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantError {
    /// OAuth error code
    pub error: &'static str,
    /// Human-readable detail
    pub description: String,
}

impl GrantError {
    fn new(error: &'static str, description: impl Into<String>) -> Self {
        Self {
            error,
            description: description.into(),
        }
    }

    pub(crate) fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    pub(crate) fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    pub(crate) fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description)
    }

    pub(crate) fn invalid_redirect_uri(description: impl Into<String>) -> Self {
        Self::new("invalid_redirect_uri", description)
    }

    pub(crate) fn invalid_client_metadata(description: impl Into<String>) -> Self {
        Self::new("invalid_client_metadata", description)
    }

    /// HTTP status of the error response
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if self.error == "invalid_client" {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

impl IntoResponse for GrantError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({"error": self.error, "error_description": self.description})),
        )
            .into_response()
    }
}

struct PendingGrant {
    completion: CompleteAuthorization,
    expires_at: Instant,
}

/// A redeemed grant, alive for the MCP session
#[derive(Clone)]
pub struct GrantedSession {
    /// Shared credential cell for every tool call of the session
    pub credential: Arc<SharedCredential>,
    /// Authenticated user
    pub user_id: String,
    /// Granted scope
    pub scope: Vec<String>,
    /// When the bearer stops being accepted
    pub expires_at: Instant,
}

impl GrantedSession {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// What one reaper pass dropped
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reaped {
    /// Number of expired authorization codes
    pub codes: usize,
    /// Bearers of the expired sessions
    pub bearers: Vec<String>,
}

/// In-memory grant store
pub struct InMemoryGrants {
    clients: Arc<ClientRegistry>,
    codes: DashMap<String, PendingGrant>,
    sessions: DashMap<String, GrantedSession>,
    code_ttl: Duration,
    session_ttl: Duration,
}

impl InMemoryGrants {
    /// Create an empty store for the clients in `clients`. Codes expire
    /// after `code_ttl`, bearers after `session_ttl`.
    #[must_use]
    pub fn new(clients: Arc<ClientRegistry>, code_ttl: Duration, session_ttl: Duration) -> Self {
        Self {
            clients,
            codes: DashMap::new(),
            sessions: DashMap::new(),
            code_ttl,
            session_ttl,
        }
    }

    /// Redeem an authorization code, exactly once.
    ///
    /// # Errors
    ///
    /// [`GrantError`] for a wrong grant type, an unknown or unauthenticated
    /// client, an unknown, expired or reused code, a client or redirect
    /// mismatch, or a failed PKCE check.
    pub fn redeem_code(&self, request: TokenRequest) -> std::result::Result<TokenResponse, GrantError> {
        if request.grant_type.as_deref() != Some("authorization_code") {
            return Err(GrantError::new(
                "unsupported_grant_type",
                "Only authorization_code is supported",
            ));
        }
        let client = self
            .clients
            .authenticate(request.client_id.as_deref(), request.client_secret.as_deref())?;
        let code = request
            .code
            .ok_or_else(|| GrantError::invalid_request("missing code"))?;

        // Removing up front makes every code single use, even on failure
        let (_, pending) = self
            .codes
            .remove(&code)
            .ok_or_else(|| GrantError::invalid_grant("Unknown or already used code"))?;

        if pending.expires_at <= Instant::now() {
            return Err(GrantError::invalid_grant("Code expired"));
        }

        let original = &pending.completion.request;
        if client.client_id != original.client_id {
            warn!(client_id = %original.client_id, "Code redeemed by another client");
            return Err(GrantError::invalid_grant("client_id mismatch"));
        }
        if request.redirect_uri.is_some() && request.redirect_uri != original.redirect_uri {
            return Err(GrantError::invalid_grant("redirect_uri mismatch"));
        }
        if let Some(challenge) = &original.code_challenge {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| GrantError::invalid_request("missing code_verifier"))?;
            verify_pkce(challenge, original.code_challenge_method.as_deref(), verifier)?;
        }

        let CompleteAuthorization {
            props,
            scope,
            user_id,
            ..
        } = pending.completion;

        let access_token = generate_token("mcpab_");
        let response = TokenResponse {
            access_token: access_token.clone(),
            token_type: "bearer".to_string(),
            scope: scope.join(" "),
            expires_in: self.session_ttl.as_secs(),
        };

        info!(user_id = %user_id, client_id = %client.client_id, "Authorization code redeemed");
        self.sessions.insert(
            access_token,
            GrantedSession {
                credential: SharedCredential::new(props),
                user_id,
                scope,
                expires_at: Instant::now() + self.session_ttl,
            },
        );
        Ok(response)
    }

    /// Look up the live session behind a bearer token.
    ///
    /// An expired session is dropped on sight.
    #[must_use]
    pub fn session(&self, bearer: &str) -> Option<GrantedSession> {
        let session = self.sessions.get(bearer).map(|entry| entry.value().clone())?;
        if session.is_expired(Instant::now()) {
            self.sessions.remove(bearer);
            debug!(user_id = %session.user_id, "Session expired");
            return None;
        }
        Some(session)
    }

    /// Drop expired codes and sessions
    pub fn reap_expired(&self) -> Reaped {
        let now = Instant::now();
        let before = self.codes.len();
        self.codes.retain(|_, pending| pending.expires_at > now);
        let codes = before.saturating_sub(self.codes.len());

        let mut bearers = Vec::new();
        self.sessions.retain(|bearer, session| {
            if session.is_expired(now) {
                bearers.push(bearer.clone());
                false
            } else {
                true
            }
        });

        if codes > 0 || !bearers.is_empty() {
            debug!(codes, sessions = bearers.len(), "Reaped expired grants");
        }
        Reaped { codes, bearers }
    }
}

#[async_trait]
impl CompletionPort for InMemoryGrants {
    async fn complete_authorization(
        &self,
        completion: CompleteAuthorization,
    ) -> Result<CompletedAuthorization> {
        let redirect_uri = completion.request.redirect_uri.as_deref().ok_or_else(|| {
            Error::DownstreamCompletionFailed("authorization request has no redirect_uri".to_string())
        })?;
        let registered = self
            .clients
            .get(&completion.request.client_id)
            .is_some_and(|client| client.allows_redirect(redirect_uri));
        if !registered {
            return Err(Error::DownstreamCompletionFailed(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }
        let mut redirect = Url::parse(redirect_uri)
            .map_err(|e| Error::DownstreamCompletionFailed(format!("invalid redirect_uri: {e}")))?;

        let code = generate_token("");
        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &completion.request.state {
                query.append_pair("state", state);
            }
        }

        debug!(client_id = %completion.request.client_id, "Issued authorization code");
        self.codes.insert(
            code,
            PendingGrant {
                completion,
                expires_at: Instant::now() + self.code_ttl,
            },
        );

        Ok(CompletedAuthorization {
            redirect_to: redirect.to_string(),
        })
    }
}

fn verify_pkce(
    challenge: &str,
    method: Option<&str>,
    verifier: &str,
) -> std::result::Result<(), GrantError> {
    let expected = match method.unwrap_or("plain") {
        m if m.eq_ignore_ascii_case("S256") => pkce::s256_challenge(verifier),
        "plain" => verifier.to_string(),
        other => {
            return Err(GrantError::invalid_request(format!(
                "unsupported code_challenge_method {other}"
            )));
        }
    };

    if bool::from(expected.as_bytes().ct_eq(challenge.as_bytes())) {
        Ok(())
    } else {
        Err(GrantError::invalid_grant("PKCE verification failed"))
    }
}

pub(crate) fn generate_token(prefix: &str) -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{prefix}{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::credential::Credential;
    use crate::oauth::clients::{ClientMetadata, RegisteredClient};
    use crate::oauth::request::{AuthorizationRequest, GrantMetadata};

    const REDIRECT: &str = "http://localhost:3000/callback";

    struct Fixture {
        grants: InMemoryGrants,
        client: RegisteredClient,
    }

    fn fixture(code_ttl: Duration, session_ttl: Duration) -> Fixture {
        let clients = Arc::new(ClientRegistry::new());
        let client = clients
            .register(ClientMetadata {
                redirect_uris: vec![REDIRECT.to_string()],
                token_endpoint_auth_method: Some("none".to_string()),
                ..Default::default()
            })
            .unwrap();
        Fixture {
            grants: InMemoryGrants::new(clients, code_ttl, session_ttl),
            client,
        }
    }

    fn standard() -> Fixture {
        fixture(Duration::from_secs(60), Duration::from_secs(3600))
    }

    fn completion(client_id: &str, challenge: Option<(&str, &str)>) -> CompleteAuthorization {
        let mut request = AuthorizationRequest::for_client(client_id);
        request.redirect_uri = Some(REDIRECT.to_string());
        request.state = Some("client-state".to_string());
        request.scope = vec!["read".to_string()];
        if let Some((challenge, method)) = challenge {
            request.code_challenge = Some(challenge.to_string());
            request.code_challenge_method = Some(method.to_string());
        }
        CompleteAuthorization {
            metadata: GrantMetadata {
                label: "a@b.com".to_string(),
            },
            props: Credential::new("AT1", "RT1", "proj", "anon"),
            scope: request.scope.clone(),
            request,
            user_id: "a@b.com".to_string(),
        }
    }

    fn code_from(redirect_to: &str) -> String {
        let url = Url::parse(redirect_to).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn token_request(client_id: &str, code: &str, verifier: Option<&str>) -> TokenRequest {
        TokenRequest {
            grant_type: Some("authorization_code".to_string()),
            code: Some(code.to_string()),
            client_id: Some(client_id.to_string()),
            client_secret: None,
            redirect_uri: Some(REDIRECT.to_string()),
            code_verifier: verifier.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn redirect_carries_code_and_client_state() {
        let Fixture { grants, client } = standard();
        let done = grants
            .complete_authorization(completion(&client.client_id, None))
            .await
            .unwrap();

        let url = Url::parse(&done.redirect_to).unwrap();
        assert_eq!(url.path(), "/callback");
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "client-state"));
        assert!(!code_from(&done.redirect_to).is_empty());
    }

    #[tokio::test]
    async fn code_is_single_use_and_binds_session() {
        let Fixture { grants, client } = standard();
        let done = grants
            .complete_authorization(completion(&client.client_id, None))
            .await
            .unwrap();
        let code = code_from(&done.redirect_to);

        let token = grants.redeem_code(token_request(&client.client_id, &code, None)).unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.scope, "read");
        assert_eq!(token.expires_in, 3600);

        let session = grants.session(&token.access_token).unwrap();
        assert_eq!(session.credential.access_token(), "AT1");

        let again = grants
            .redeem_code(token_request(&client.client_id, &code, None))
            .unwrap_err();
        assert_eq!(again.error, "invalid_grant");
    }

    #[tokio::test]
    async fn s256_challenge_is_enforced() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce::s256_challenge(verifier);
        let Fixture { grants, client } = standard();
        let id = client.client_id.as_str();

        let done = grants
            .complete_authorization(completion(id, Some((&challenge, "S256"))))
            .await
            .unwrap();
        let bad = grants
            .redeem_code(token_request(id, &code_from(&done.redirect_to), Some("wrong")))
            .unwrap_err();
        assert_eq!(bad.description, "PKCE verification failed");

        let done = grants
            .complete_authorization(completion(id, Some((&challenge, "S256"))))
            .await
            .unwrap();
        assert!(
            grants
                .redeem_code(token_request(id, &code_from(&done.redirect_to), Some(verifier)))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn code_is_bound_to_its_client() {
        let Fixture { grants, client } = standard();
        let done = grants
            .complete_authorization(completion(&client.client_id, None))
            .await
            .unwrap();
        let code = code_from(&done.redirect_to);

        // A made-up client is not even authenticated
        let unknown = grants.redeem_code(token_request("other", &code, None)).unwrap_err();
        assert_eq!(unknown.error, "invalid_client");
        assert_eq!(unknown.status_code(), StatusCode::UNAUTHORIZED);

        // A second registered client cannot redeem the first one's code
        let thief = grants
            .clients
            .register(ClientMetadata {
                redirect_uris: vec![REDIRECT.to_string()],
                token_endpoint_auth_method: Some("none".to_string()),
                ..Default::default()
            })
            .unwrap();
        let stolen = grants
            .redeem_code(token_request(&thief.client_id, &code, None))
            .unwrap_err();
        assert_eq!(stolen.description, "client_id mismatch");
    }

    #[tokio::test]
    async fn unregistered_client_or_redirect_gets_no_code() {
        let Fixture { grants, client } = standard();

        let made_up = grants
            .complete_authorization(completion("c1", None))
            .await
            .unwrap_err();
        assert!(matches!(made_up, Error::DownstreamCompletionFailed(_)));

        let mut evil = completion(&client.client_id, None);
        evil.request.redirect_uri = Some("https://attacker.example/steal".to_string());
        let err = grants.complete_authorization(evil).await.unwrap_err();
        assert!(matches!(err, Error::DownstreamCompletionFailed(_)));
        assert_eq!(grants.reap_expired(), Reaped::default());
    }

    #[tokio::test]
    async fn confidential_client_redeems_with_secret() {
        let clients = Arc::new(ClientRegistry::new());
        let client = clients
            .register(ClientMetadata {
                redirect_uris: vec![REDIRECT.to_string()],
                token_endpoint_auth_method: Some("client_secret_post".to_string()),
                ..Default::default()
            })
            .unwrap();
        let grants = InMemoryGrants::new(clients, Duration::from_secs(60), Duration::from_secs(60));

        let done = grants
            .complete_authorization(completion(&client.client_id, None))
            .await
            .unwrap();
        let mut request = token_request(&client.client_id, &code_from(&done.redirect_to), None);
        assert_eq!(grants.redeem_code(request.clone()).unwrap_err().error, "invalid_client");

        // The failed attempt did not consume the code
        request.client_secret = client.client_secret.clone();
        assert!(grants.redeem_code(request).is_ok());
    }

    #[tokio::test]
    async fn expired_codes_are_rejected_and_reaped() {
        let Fixture { grants, client } = fixture(Duration::ZERO, Duration::from_secs(60));
        let id = client.client_id.as_str();
        let first = grants.complete_authorization(completion(id, None)).await.unwrap();
        let _second = grants.complete_authorization(completion(id, None)).await.unwrap();

        let err = grants
            .redeem_code(token_request(id, &code_from(&first.redirect_to), None))
            .unwrap_err();
        assert_eq!(err.description, "Code expired");
        assert_eq!(grants.reap_expired().codes, 1);
    }

    #[tokio::test]
    async fn expired_sessions_are_refused_and_reaped() {
        let Fixture { grants, client } = fixture(Duration::from_secs(60), Duration::from_millis(20));
        let id = client.client_id.as_str();

        let mut bearers = Vec::new();
        for _ in 0..2 {
            let done = grants.complete_authorization(completion(id, None)).await.unwrap();
            let token = grants
                .redeem_code(token_request(id, &code_from(&done.redirect_to), None))
                .unwrap();
            assert!(grants.session(&token.access_token).is_some());
            bearers.push(token.access_token);
        }

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(grants.session(&bearers[0]).is_none());
        let reaped = grants.reap_expired();
        assert_eq!(reaped.bearers, vec![bearers[1].clone()]);
        assert!(grants.session(&bearers[1]).is_none());
    }

    #[tokio::test]
    async fn missing_redirect_uri_fails_completion() {
        let Fixture { grants, client } = standard();
        let mut c = completion(&client.client_id, None);
        c.request.redirect_uri = None;
        let err = grants.complete_authorization(c).await.unwrap_err();
        assert!(matches!(err, Error::DownstreamCompletionFailed(_)));
    }

    #[test]
    fn wrong_grant_type_is_unsupported() {
        let Fixture { grants, client } = standard();
        let mut request = token_request(&client.client_id, "x", None);
        request.grant_type = Some("password".to_string());
        assert_eq!(grants.redeem_code(request).unwrap_err().error, "unsupported_grant_type");
    }
}
