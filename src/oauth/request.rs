//! Inbound authorization request and the downstream completion port
//!
//! The MCP client's `/authorize` query is parsed into an
//! [`AuthorizationRequest`] that the flow carries untouched to the
//! [`CompletionPort`], which turns a verified identity into a grant the
//! client can redeem.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::{Error, Result};

/// OAuth authorization request as received from the MCP client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    /// `response_type` (normally `code`)
    pub response_type: String,
    /// Requesting client
    pub client_id: String,
    /// Where the client expects the authorization code
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scope: Vec<String>,
    /// Client-side state echoed back on redirect
    #[serde(default)]
    pub state: Option<String>,
    /// PKCE challenge sent by the client
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// PKCE challenge method (`S256` or `plain`)
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

impl AuthorizationRequest {
    /// Build a minimal request for `client_id`
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            response_type: "code".to_string(),
            client_id: client_id.into(),
            redirect_uri: None,
            scope: Vec::new(),
            state: None,
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    /// Parse the `/authorize` query parameters
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] when `client_id` is missing or empty.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self> {
        let non_empty = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let client_id = non_empty("client_id")
            .ok_or_else(|| Error::InvalidRequest("missing client_id".to_string()))?;

        Ok(Self {
            response_type: non_empty("response_type").unwrap_or_else(|| "code".to_string()),
            client_id,
            redirect_uri: non_empty("redirect_uri"),
            scope: params
                .get("scope")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            state: non_empty("state"),
            code_challenge: non_empty("code_challenge"),
            code_challenge_method: non_empty("code_challenge_method"),
        })
    }
}

/// Grant metadata shown to the user when listing grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantMetadata {
    /// Human-readable label (the user's email)
    pub label: String,
}

/// Payload handed to the completion port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteAuthorization {
    /// Grant metadata
    pub metadata: GrantMetadata,
    /// Session credential embedded in the grant
    pub props: Credential,
    /// The original inbound request
    pub request: AuthorizationRequest,
    /// Granted scope (the scope originally requested)
    pub scope: Vec<String>,
    /// Authenticated user
    pub user_id: String,
}

/// Where to send the browser once the grant exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedAuthorization {
    /// Redirect target for the browser
    pub redirect_to: String,
}

/// Issues the client-facing grant once the user's identity is verified
#[async_trait]
pub trait CompletionPort: Send + Sync + 'static {
    /// Record the grant and return the client redirect
    async fn complete_authorization(
        &self,
        completion: CompleteAuthorization,
    ) -> Result<CompletedAuthorization>;
}
