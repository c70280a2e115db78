//! Session credential (the "props" carried by every MCP session)
//!
//! A [`Credential`] is minted once when the authorization flow completes and
//! then lives for the whole MCP session. The token pair is only ever replaced
//! as a unit, through [`SharedCredential::replace_tokens`], by the refresh
//! wrapper in [`crate::api`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

/// Provider tokens plus the routing identifiers needed to renew them
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token sent to the backend API
    pub access_token: String,
    /// Token used to renew `access_token`
    pub refresh_token: String,
    /// Identity project the tokens were issued by
    pub project_id: String,
    /// Public client key of that project
    pub client_id: String,
}

impl Credential {
    /// Create a credential from a freshly issued token pair
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        project_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            project_id: project_id.into(),
            client_id: client_id.into(),
        }
    }
}

// Tokens stay out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Single mutable cell holding a session's [`Credential`].
///
/// Every tool call for a session shares one `Arc<SharedCredential>`, so a
/// renewal performed by one call is observed by all later calls. Renewals
/// are serialized through [`SharedCredential::renewal_gate`].
#[derive(Debug)]
pub struct SharedCredential {
    current: RwLock<Credential>,
    renewal: Mutex<()>,
}

impl SharedCredential {
    /// Wrap a credential in a shareable cell
    #[must_use]
    pub fn new(credential: Credential) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(credential),
            renewal: Mutex::new(()),
        })
    }

    /// Consistent copy of the current token pair
    pub fn snapshot(&self) -> Credential {
        self.current.read().clone()
    }

    /// Current access token
    pub fn access_token(&self) -> String {
        self.current.read().access_token.clone()
    }

    /// Replace both tokens in one write
    pub fn replace_tokens(&self, access_token: String, refresh_token: String) {
        let mut current = self.current.write();
        current.access_token = access_token;
        current.refresh_token = refresh_token;
    }

    /// Acquire the per-credential renewal gate
    pub async fn renewal_gate(&self) -> MutexGuard<'_, ()> {
        self.renewal.lock().await
    }
}
