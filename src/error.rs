//! Error types for the MCP auth bridge

use std::io;

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::oauth::pages;

/// Result type alias for the MCP auth bridge
pub type Result<T> = std::result::Result<T, Error>;

/// MCP auth bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed inbound authorization request or form submission
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// State cookie absent, or anti-forgery token does not match it
    #[error("Invalid state")]
    InvalidState,

    /// State cookie present but cannot be verified or parsed
    #[error("Corrupted OAuth state cookie: {0}")]
    CorruptedState(String),

    /// Identity provider refused the credentials (message is the provider's)
    #[error("{0}")]
    CredentialRejected(String),

    /// Federated provider outside the allow-list
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// PKCE verifier cookie missing from the callback request
    #[error("Missing PKCE code verifier")]
    MissingVerifier,

    /// Authorization code exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The completion port could not issue the downstream grant
    #[error("Error returning to MCP client: {0}")]
    DownstreamCompletionFailed(String),

    /// Backend request failed after at most one renewal
    #[error("Failed to perform operation{}: {body}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RequestFailed {
        /// Final HTTP status, `None` when no response was received
        status: Option<u16>,
        /// Response body or transport error text
        body: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a [`Error::RequestFailed`]
    pub fn request_failed(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            body: body.into(),
        }
    }

    /// HTTP status used when the error is rendered to the browser
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidState
            | Self::CorruptedState(_)
            | Self::UnsupportedProvider(_)
            | Self::MissingVerifier => StatusCode::BAD_REQUEST,
            Self::CredentialRejected(_) => StatusCode::UNAUTHORIZED,
            Self::RequestFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), Html(pages::error_dialog(&self.to_string()))).into_response()
    }
}
