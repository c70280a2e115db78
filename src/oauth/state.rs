//! State cookie codec
//!
//! The flow keeps no server-side memory between requests. The inbound
//! [`AuthorizationRequest`] and the anti-forgery token travel in the
//! `oauth_state` cookie instead, as `base64url(json) "." base64url(hmac)`.
//! Only a value carrying a valid HMAC under this process's key is trusted.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac, digest::KeyInit};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::request::AuthorizationRequest;
use crate::{Error, Result};

/// Name of the cookie carrying [`OAuthState`]
pub const STATE_COOKIE: &str = "oauth_state";

type HmacSha256 = Hmac<Sha256>;

/// Flow state round-tripped through the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
    /// The MCP client's original request
    pub oauth_req_info: AuthorizationRequest,
    /// Anti-forgery token
    pub state: String,
}

impl OAuthState {
    /// Start a new flow attempt with a fresh anti-forgery token
    #[must_use]
    pub fn new(oauth_req_info: AuthorizationRequest) -> Self {
        Self {
            oauth_req_info,
            state: generate_state(),
        }
    }

    /// Constant-time comparison against a submitted token
    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        self.state.as_bytes().ct_eq(submitted.as_bytes()).into()
    }
}

/// Signs and verifies state cookie values
#[derive(Clone)]
pub struct StateCodec {
    key: Vec<u8>,
}

impl StateCodec {
    /// Create a codec with an explicit signing key
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Create a codec with a random key (cookies die with the process)
    #[must_use]
    pub fn ephemeral() -> Self {
        let key: [u8; 32] = rand::random();
        Self::new(key.to_vec())
    }

    /// Serialize and sign a state value
    pub fn encode(&self, state: &OAuthState) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(state)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    /// Verify and parse a cookie value
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptedState`] for any malformed, unsigned or
    /// tampered value.
    pub fn decode(&self, value: &str) -> Result<OAuthState> {
        let (payload, signature) = value
            .split_once('.')
            .ok_or_else(|| Error::CorruptedState("missing signature".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| Error::CorruptedState(format!("bad signature encoding: {e}")))?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::CorruptedState("signature mismatch".to_string()))?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| Error::CorruptedState(format!("bad payload encoding: {e}")))?;

        serde_json::from_slice(&json).map_err(|e| Error::CorruptedState(e.to_string()))
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as KeyInit>::new_from_slice(&self.key)
            .map_err(|e| Error::Internal(format!("Invalid state signing key: {e}")))
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Attributes shared by the flow cookies
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Cookie lifetime
    pub max_age: Duration,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true,
            max_age: Duration::from_secs(1800),
        }
    }
}

impl CookieSettings {
    /// Build a flow cookie. Not HTTP-only: the login page's federated
    /// links read it client-side.
    #[must_use]
    pub fn build(&self, name: impl Into<String>, value: impl Into<String>) -> Cookie<'static> {
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((name.into(), value.into()))
            .path("/")
            .max_age(time::Duration::seconds(max_age))
            .secure(self.secure)
            .http_only(false)
            .same_site(SameSite::Lax)
            .build()
    }
}

/// Cookie used to delete `name` (must carry the same path it was set with)
#[must_use]
pub fn removal(name: impl Into<String>) -> Cookie<'static> {
    Cookie::build((name.into(), "")).path("/").build()
}

/// Generate an unpredictable anti-forgery token
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
