//! Identity provider client
//!
//! Talks to the upstream identity provider's auth API:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | Password grant | `POST {base}/auth/v1/token?grant_type=password` |
//! | PKCE code exchange | `POST {base}/auth/v1/token?grant_type=pkce` |
//! | Refresh | `POST {base}/auth/v1/token?grant_type=refresh_token` |
//! | Federated sign-in | `GET {base}/auth/v1/authorize?provider=...` (browser redirect) |
//!
//! Every request carries the project's public key in the `apikey` header.

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{self, PkcePair};
use super::provider::FederatedProvider;
use crate::config::{HttpConfig, IdentityConfig};
use crate::{Error, Result};

/// Token pair plus the identity it belongs to
#[derive(Clone)]
pub struct Session {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Authenticated user, when the endpoint returns one
    pub user: Option<SessionUser>,
}

/// User block of a token response
#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    /// Provider-side user id
    pub id: String,
    /// Email, when known
    #[serde(default)]
    pub email: Option<String>,
}

/// Raw token endpoint response; fields are optional because errors reuse it
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<SessionUser>,
}

impl TokenResponse {
    /// Keep the response only if it carries a usable token pair
    fn into_session(self) -> Option<Session> {
        match (self.access_token, self.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Some(Session {
                    access_token,
                    refresh_token,
                    user: self.user,
                })
            }
            _ => None,
        }
    }
}

/// Result of a refresh call. The provider may rotate the refresh token or
/// leave it out, in which case the old one stays valid.
#[derive(Clone)]
pub struct RefreshedTokens {
    /// New access token
    pub access_token: String,
    /// Rotated refresh token, if one was issued
    pub refresh_token: Option<String>,
}

/// Redirect produced by a federated sign-in
#[derive(Clone)]
pub struct FederatedSignIn {
    /// Provider consent page
    pub url: String,
    /// Value for the verifier cookie
    pub verifier_cookie: String,
}

#[derive(Serialize)]
struct PasswordGrantBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct PkceGrantBody<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshGrantBody<'a> {
    refresh_token: &'a str,
}

/// HTTP client for the identity provider
#[derive(Clone)]
pub struct IdentityClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl IdentityClient {
    /// Create a client against `base_url` using `api_key`
    pub fn new(http_client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Create a client from configuration with its own timeout-bound HTTP client
    pub fn from_config(identity: &IdentityConfig, http: &HttpConfig) -> Result<Self> {
        let http_client = build_http_client(http)?;
        Ok(Self::new(
            http_client,
            identity.resolved_base_url(),
            identity.client_id.clone(),
        ))
    }

    /// Identity base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token_url(&self, grant_type: &str) -> String {
        format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url)
    }

    /// Exchange email and password for a session
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialRejected`] with the provider's message when
    /// the provider refuses, is unreachable, or omits either token.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let response = self
            .http_client
            .post(self.token_url("password"))
            .header("apikey", &self.api_key)
            .json(&PasswordGrantBody { email, password })
            .send()
            .await
            .map_err(|e| Error::CredentialRejected(format!("Identity provider unreachable: {e}")))?;

        let status = response.status();
        let body = read_json(response).await;
        if !status.is_success() {
            let message = provider_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            debug!(status = %status, "Password grant rejected");
            return Err(Error::CredentialRejected(message));
        }

        parse_token_response(body)
            .into_session()
            .ok_or_else(|| Error::CredentialRejected("Missing tokens".to_string()))
    }

    /// Exchange an authorization code and its PKCE verifier for a session
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenExchangeFailed`] on network errors, non-success
    /// responses, or responses without a token pair and user id.
    pub async fn exchange_code_for_session(&self, code: &str, code_verifier: &str) -> Result<Session> {
        let response = self
            .http_client
            .post(self.token_url("pkce"))
            .header("apikey", &self.api_key)
            .json(&PkceGrantBody {
                auth_code: code,
                code_verifier,
            })
            .send()
            .await
            .map_err(|e| Error::TokenExchangeFailed(e.to_string()))?;

        let status = response.status();
        let body = read_json(response).await;
        if !status.is_success() {
            let message = provider_message(&body).unwrap_or_default();
            return Err(Error::TokenExchangeFailed(format!("HTTP {status} {message}").trim().to_string()));
        }

        let session = parse_token_response(body)
            .into_session()
            .ok_or_else(|| Error::TokenExchangeFailed("response missing tokens".to_string()))?;

        if session.user.as_ref().is_none_or(|u| u.id.is_empty()) {
            return Err(Error::TokenExchangeFailed("response missing user identity".to_string()));
        }

        info!(
            user_id = %session.user.as_ref().map_or("", |u| u.id.as_str()),
            "Authorization code exchanged"
        );
        Ok(session)
    }

    /// Renew an access token
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenExchangeFailed`] if the provider is unreachable,
    /// answers with a non-success status, or returns no access token.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let response = self
            .http_client
            .post(self.token_url("refresh_token"))
            .header("apikey", &self.api_key)
            .json(&RefreshGrantBody { refresh_token })
            .send()
            .await
            .map_err(|e| Error::TokenExchangeFailed(format!("Token refresh failed: {e}")))?;

        let status = response.status();
        let body = read_json(response).await;
        if !status.is_success() {
            warn!(status = %status, "Token refresh rejected");
            return Err(Error::TokenExchangeFailed(format!(
                "Token refresh failed: HTTP {status}"
            )));
        }

        let parsed = parse_token_response(body);
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::TokenExchangeFailed("refresh response missing access_token".to_string()))?;

        Ok(RefreshedTokens {
            access_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
        })
    }

    /// Start a federated sign-in.
    ///
    /// Asks for offline access and forced consent so the provider always
    /// issues a refresh token.
    pub fn federated_sign_in(
        &self,
        provider: FederatedProvider,
        redirect_to: &str,
    ) -> Result<FederatedSignIn> {
        let PkcePair {
            verifier,
            challenge,
        } = pkce::generate_pkce();

        let mut url = Url::parse(&format!("{}/auth/v1/authorize", self.base_url))
            .map_err(|e| Error::Internal(format!("Invalid identity base URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "s256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(FederatedSignIn {
            url: url.to_string(),
            verifier_cookie: pkce::encode_verifier_cookie(&verifier),
        })
    }
}

/// Build an outbound client with bounded timeouts and no redirect following
pub fn build_http_client(http: &HttpConfig) -> Result<Client> {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(Error::Http)
}

async fn read_json(response: Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn parse_token_response(body: Value) -> TokenResponse {
    serde_json::from_value(body).unwrap_or_default()
}

/// Human-readable error text from an identity provider error body
fn provider_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => ["error_description", "msg", "message", "error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client() -> IdentityClient {
        IdentityClient::new(Client::new(), "https://proj.supabase.co/", "anon")
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(client().base_url(), "https://proj.supabase.co");
        assert_eq!(
            client().token_url("pkce"),
            "https://proj.supabase.co/auth/v1/token?grant_type=pkce"
        );
    }

    #[test]
    fn provider_message_prefers_description() {
        let body = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
        assert_eq!(provider_message(&body).as_deref(), Some("Invalid login credentials"));

        let body = json!({"code": 400, "msg": "Email not confirmed"});
        assert_eq!(provider_message(&body).as_deref(), Some("Email not confirmed"));

        assert_eq!(provider_message(&json!("Bad Gateway")).as_deref(), Some("Bad Gateway"));
        assert_eq!(provider_message(&json!({})), None);
    }

    #[test]
    fn session_requires_both_tokens() {
        let full = parse_token_response(json!({"access_token": "AT", "refresh_token": "RT"}));
        assert!(full.into_session().is_some());

        let partial = parse_token_response(json!({"access_token": "AT"}));
        assert!(partial.into_session().is_none());

        let empty = parse_token_response(json!({"access_token": "", "refresh_token": "RT"}));
        assert!(empty.into_session().is_none());

        let garbage = parse_token_response(json!("<html>"));
        assert!(garbage.into_session().is_none());
    }

    #[test]
    fn federated_url_requests_offline_consent_with_pkce() {
        let sign_in = client()
            .federated_sign_in(FederatedProvider::Google, "https://bridge.example/oauth/callback")
            .unwrap();

        let url = Url::parse(&sign_in.url).unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["provider"], "google");
        assert_eq!(params["redirect_to"], "https://bridge.example/oauth/callback");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["code_challenge_method"], "s256");

        let verifier = pkce::decode_verifier_cookie(&sign_in.verifier_cookie).unwrap();
        assert_eq!(params["code_challenge"], pkce::s256_challenge(&verifier));
    }
}
