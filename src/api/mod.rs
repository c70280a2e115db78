//! Backend API client with transparent token renewal
//!
//! Every tool call goes through [`ApiClient::call`]. A 401 or 403 from the
//! backend triggers exactly one renewal of the session's access token and
//! exactly one retry; there is no loop, so a dead refresh token fails the
//! call instead of spinning.
//!
//! Renewals are serialized per [`SharedCredential`]: a call that loses the
//! race to renew retries with the token the winner stored. A renewal goes to
//! the identity project named in the credential itself, with the
//! credential's client key.
//!
//! Project-scoped calls ([`ApiClient::call_with_key`]) authenticate with the
//! selected project's secret key instead and are never renewed.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, IdentityConfig};
use crate::credential::{Credential, SharedCredential};
use crate::oauth::identity::{self, IdentityClient};
use crate::{Error, Result};

/// One backend request
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Path below the backend base URL, or a full URL when `absolute`
    pub endpoint: String,
    /// HTTP method
    pub method: Method,
    /// Caller headers, applied over the defaults
    pub headers: Vec<(String, String)>,
    /// Query parameters, repeated keys allowed
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
    /// `endpoint` is a full URL
    pub absolute: bool,
}

impl RequestSpec {
    /// Request with an explicit method
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            absolute: false,
        }
    }

    /// `GET endpoint`
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// `POST endpoint` with a JSON body
    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, endpoint).with_body(body)
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a caller header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Treat `endpoint` as a full URL
    #[must_use]
    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }
}

/// Text block of a tool response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    /// Always `text`
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload
    pub text: String,
}

/// Response shape every tool handler returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Content blocks
    pub content: Vec<TextContent>,
}

impl ToolResponse {
    /// Single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::texts([text])
    }

    /// One block per item
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content: texts
                .into_iter()
                .map(|text| TextContent {
                    kind: "text".to_string(),
                    text: text.into(),
                })
                .collect(),
        }
    }

    /// Single block holding `value` serialized as JSON
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// All blocks joined by newlines
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Backend API client
#[derive(Clone)]
pub struct ApiClient {
    http_client: Client,
    base_url: String,
    identity_base: Option<String>,
}

impl ApiClient {
    /// Create a client for `base_url`. Tokens are renewed at the hosted
    /// identity endpoint of each credential's project.
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity_base: None,
        }
    }

    /// Renew every credential at `base_url` instead of its project's
    /// hosted endpoint
    #[must_use]
    pub fn with_identity_base(mut self, base_url: impl Into<String>) -> Self {
        self.identity_base = Some(base_url.into());
        self
    }

    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = identity::build_http_client(&config.http)?;
        let client = Self::new(http_client, config.backend.base_url.clone());
        Ok(match &config.identity.base_url {
            Some(base_url) => client.with_identity_base(base_url.trim_end_matches('/')),
            None => client,
        })
    }

    /// Identity client that renews `credential`
    fn identity_for(&self, credential: &Credential) -> IdentityClient {
        let base_url = self
            .identity_base
            .clone()
            .unwrap_or_else(|| IdentityConfig::project_base_url(&credential.project_id));
        IdentityClient::new(self.http_client.clone(), base_url, credential.client_id.clone())
    }

    /// Perform a request and wrap the parsed body as a [`ToolResponse`]
    ///
    /// # Errors
    ///
    /// [`Error::RequestFailed`] when the final response is not a success, is
    /// not JSON, or never arrives.
    pub async fn call(&self, credential: &SharedCredential, spec: &RequestSpec) -> Result<ToolResponse> {
        let value = self.call_json(credential, spec).await?;
        Ok(ToolResponse::json(&value))
    }

    /// Perform a request and return the parsed JSON body
    pub async fn call_json(&self, credential: &SharedCredential, spec: &RequestSpec) -> Result<Value> {
        let token = credential.access_token();
        let response = self.send(spec, &token).await?;
        let status = response.status();

        if !matches!(status.as_u16(), 401 | 403) {
            return read_success(response).await;
        }

        let body = response.text().await.unwrap_or_default();
        debug!(endpoint = %spec.endpoint, status = %status, "Backend refused token, renewing");

        let renewed = match self.renew(credential, &token).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(endpoint = %spec.endpoint, error = %e, "Token renewal failed");
                return Err(Error::request_failed(Some(status.as_u16()), body));
            }
        };

        let retry = self.send(spec, &renewed).await?;
        read_success(retry).await
    }

    /// Perform a project-scoped request authenticated with `api_key`
    ///
    /// # Errors
    ///
    /// [`Error::RequestFailed`] as for [`ApiClient::call`]; a 401 or 403 is
    /// final here.
    pub async fn call_with_key(&self, api_key: &str, spec: &RequestSpec) -> Result<Value> {
        let response = self.send(spec, api_key).await?;
        read_success(response).await
    }

    /// Renew the access token unless a concurrent call already did.
    ///
    /// Returns the token to retry with.
    async fn renew(&self, credential: &SharedCredential, stale: &str) -> Result<String> {
        let _gate = credential.renewal_gate().await;

        let current = credential.snapshot();
        if current.access_token != stale {
            debug!(project_id = %current.project_id, "Token already renewed by a concurrent call");
            return Ok(current.access_token);
        }

        let refreshed = self
            .identity_for(&current)
            .refresh_session(&current.refresh_token)
            .await?;
        let refresh_token = refreshed.refresh_token.unwrap_or(current.refresh_token);
        credential.replace_tokens(refreshed.access_token.clone(), refresh_token);

        info!(project_id = %current.project_id, "Access token renewed");
        Ok(refreshed.access_token)
    }

    fn url(&self, spec: &RequestSpec) -> String {
        if spec.absolute {
            spec.endpoint.clone()
        } else {
            format!("{}{}", self.base_url, spec.endpoint)
        }
    }

    async fn send(&self, spec: &RequestSpec, bearer: &str) -> Result<Response> {
        let mut request = self
            .http_client
            .request(spec.method.clone(), self.url(spec))
            .headers(build_headers(spec, bearer)?);
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            request = request.body(serde_json::to_vec(body)?);
        }

        request
            .send()
            .await
            .map_err(|e| Error::request_failed(None, e.to_string()))
    }
}

/// Defaults, then caller headers, then the bearer. A caller cannot drop or
/// replace the bearer.
fn build_headers(spec: &RequestSpec, bearer: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if spec.body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    for (name, value) in &spec.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("invalid header name {name}: {e}")))?;
        if name == AUTHORIZATION {
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }

    let bearer = HeaderValue::from_str(&format!("Bearer {bearer}"))
        .map_err(|_| Error::Internal("bearer token is not a valid header value".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

/// Parse a final response; anything but a JSON success is `RequestFailed`
async fn read_success(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::request_failed(Some(status.as_u16()), e.to_string()))?;

    if !status.is_success() {
        return Err(Error::request_failed(Some(status.as_u16()), text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|_| Error::request_failed(Some(status.as_u16()), text))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_and_bearer() {
        let spec = RequestSpec::get("/projects");
        let headers = build_headers(&spec, "AT1").unwrap();
        assert_eq!(headers[ACCEPT], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer AT1");
        assert!(!headers.contains_key(CONTENT_TYPE));
    }

    #[test]
    fn body_adds_json_content_type() {
        let spec = RequestSpec::post("/projects", json!({"name": "demo"}));
        let headers = build_headers(&spec, "AT1").unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn caller_headers_override_defaults_but_not_bearer() {
        let spec = RequestSpec::post("/projects", json!({}))
            .with_header("Content-Type", "application/vnd.api+json")
            .with_header("project", "pro_123")
            .with_header("Authorization", "Bearer stolen");
        let headers = build_headers(&spec, "AT1").unwrap();

        assert_eq!(headers[CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(headers["project"], "pro_123");
        assert_eq!(headers[AUTHORIZATION], "Bearer AT1");
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn invalid_caller_header_is_rejected() {
        let spec = RequestSpec::get("/x").with_header("bad header", "v");
        assert!(matches!(build_headers(&spec, "AT1"), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn absolute_endpoint_skips_base_url() {
        let api = ApiClient::new(Client::new(), "https://api.example/v1/");

        assert_eq!(api.url(&RequestSpec::get("/projects")), "https://api.example/v1/projects");
        assert_eq!(
            api.url(&RequestSpec::get("https://shield.example/register").absolute()),
            "https://shield.example/register"
        );
    }

    #[test]
    fn renewal_targets_the_credential_project() {
        let credential = Credential::new("AT1", "RT1", "tenant-a", "anon-a");

        let hosted = ApiClient::new(Client::new(), "https://api.example/v1");
        assert_eq!(
            hosted.identity_for(&credential).base_url(),
            "https://tenant-a.supabase.co"
        );

        let pinned = hosted.with_identity_base("http://127.0.0.1:9999");
        assert_eq!(pinned.identity_for(&credential).base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn tool_response_shape() {
        let response = ToolResponse::json(&json!({"id": "pro_1"}));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"content": [{"type": "text", "text": "{\"id\":\"pro_1\"}"}]})
        );
    }
}
