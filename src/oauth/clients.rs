//! Dynamic client registration (RFC 7591)
//!
//! MCP clients register at `POST /register` before their first
//! authorization request. Only registered clients may start a flow, and
//! only toward one of the redirect URIs they registered, so an
//! authorization code can never be delivered to an address its client did
//! not declare up front.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use url::{Host, Url};

use super::grants::{GrantError, generate_token};
use super::request::AuthorizationRequest;
use crate::{Error, Result};

/// Token endpoint authentication methods accepted at registration
const AUTH_METHODS: [&str; 3] = ["none", "client_secret_post", "client_secret_basic"];

/// Client metadata posted to `POST /register`
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClientMetadata {
    /// Redirect URIs the client will use, at least one
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Display name
    #[serde(default)]
    pub client_name: Option<String>,
    /// `none`, `client_secret_post` or `client_secret_basic` (default)
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Only `authorization_code` is served
    #[serde(default)]
    pub grant_types: Vec<String>,
    /// Only `code` is served
    #[serde(default)]
    pub response_types: Vec<String>,
}

/// A registered client, also the registration response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Issued client identifier
    pub client_id: String,
    /// Issued secret, absent for public clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Registration time, seconds since the epoch
    pub client_id_issued_at: u64,
    /// Zero: secrets never expire
    pub client_secret_expires_at: u64,
    /// Exact redirect URIs the client may use
    pub redirect_uris: Vec<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// How the client authenticates at `POST /token`
    pub token_endpoint_auth_method: String,
    /// Always `authorization_code`
    pub grant_types: Vec<String>,
    /// Always `code`
    pub response_types: Vec<String>,
}

impl RegisteredClient {
    /// Whether `redirect_uri` is one of the registered URIs (exact match)
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

/// In-memory client registry
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl ClientRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and return its credentials.
    ///
    /// # Errors
    ///
    /// `invalid_redirect_uri` when no URI is given or one is neither HTTPS
    /// nor loopback HTTP, `invalid_client_metadata` for unsupported grant
    /// types, response types or authentication methods.
    pub fn register(&self, metadata: ClientMetadata) -> std::result::Result<RegisteredClient, GrantError> {
        if metadata.redirect_uris.is_empty() {
            return Err(GrantError::invalid_redirect_uri(
                "At least one redirect_uri is required",
            ));
        }
        if let Some(uri) = metadata.redirect_uris.iter().find(|uri| !is_valid_redirect_uri(uri)) {
            return Err(GrantError::invalid_redirect_uri(format!(
                "Invalid redirect_uri: {uri}. Must be HTTPS or loopback HTTP without a fragment"
            )));
        }

        if let Some(grant_type) = metadata
            .grant_types
            .iter()
            .find(|g| g.as_str() != "authorization_code")
        {
            return Err(GrantError::invalid_client_metadata(format!(
                "Unsupported grant_type: {grant_type}"
            )));
        }
        if let Some(response_type) = metadata.response_types.iter().find(|r| r.as_str() != "code") {
            return Err(GrantError::invalid_client_metadata(format!(
                "Unsupported response_type: {response_type}"
            )));
        }

        let auth_method = metadata
            .token_endpoint_auth_method
            .unwrap_or_else(|| "client_secret_basic".to_string());
        if !AUTH_METHODS.contains(&auth_method.as_str()) {
            return Err(GrantError::invalid_client_metadata(format!(
                "Unsupported token_endpoint_auth_method: {auth_method}"
            )));
        }

        let client = RegisteredClient {
            client_id: generate_token("mcpc_"),
            client_secret: (auth_method != "none").then(|| generate_token("")),
            client_id_issued_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            client_secret_expires_at: 0,
            redirect_uris: metadata.redirect_uris,
            client_name: metadata.client_name,
            token_endpoint_auth_method: auth_method,
            grant_types: vec!["authorization_code".to_string()],
            response_types: vec!["code".to_string()],
        };

        info!(
            client_id = %client.client_id,
            client_name = client.client_name.as_deref().unwrap_or("-"),
            redirect_uris = client.redirect_uris.len(),
            "Client registered"
        );
        self.clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    /// Look up a registered client
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Check an inbound authorization request against the registry.
    ///
    /// A request without `redirect_uri` gets the client's only registered
    /// URI; clients with several must name one.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for an unknown client, a missing redirect
    /// URI that cannot be defaulted, or one that was not registered.
    pub fn authorize(&self, mut request: AuthorizationRequest) -> Result<AuthorizationRequest> {
        let Some(client) = self.get(&request.client_id) else {
            warn!(client_id = %request.client_id, "Authorization for unregistered client");
            return Err(Error::InvalidRequest("Invalid client".to_string()));
        };

        match request.redirect_uri.as_deref() {
            Some(uri) if client.allows_redirect(uri) => {}
            Some(uri) => {
                warn!(client_id = %client.client_id, redirect_uri = uri, "Unregistered redirect_uri");
                return Err(Error::InvalidRequest("Invalid redirect URI".to_string()));
            }
            None => match client.redirect_uris.as_slice() {
                [only] => request.redirect_uri = Some(only.clone()),
                _ => return Err(Error::InvalidRequest("missing redirect_uri".to_string())),
            },
        }
        Ok(request)
    }

    /// Authenticate a client at the token endpoint.
    ///
    /// # Errors
    ///
    /// `invalid_client` for an unknown client, or a missing or wrong secret
    /// for a confidential one.
    pub fn authenticate(
        &self,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> std::result::Result<RegisteredClient, GrantError> {
        let client = client_id
            .and_then(|id| self.get(id))
            .ok_or_else(|| GrantError::invalid_client("Unknown client"))?;

        if let Some(expected) = &client.client_secret {
            let presented = client_secret.unwrap_or_default();
            if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
                warn!(client_id = %client.client_id, "Client authentication failed");
                return Err(GrantError::invalid_client("Client authentication failed"));
            }
        }
        Ok(client)
    }
}

/// HTTPS anywhere, plain HTTP only on loopback hosts, never a fragment
fn is_valid_redirect_uri(uri: &str) -> bool {
    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    if url.fragment().is_some() {
        return false;
    }
    match url.scheme() {
        "https" => url.host().is_some(),
        "http" => match url.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn metadata(uris: &[&str], method: Option<&str>) -> ClientMetadata {
        ClientMetadata {
            redirect_uris: uris.iter().map(|u| (*u).to_string()).collect(),
            client_name: Some("Inspector".to_string()),
            token_endpoint_auth_method: method.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn redirect_uri_rules() {
        assert!(is_valid_redirect_uri("https://claude.ai/api/mcp/auth_callback"));
        assert!(is_valid_redirect_uri("http://localhost:6274/oauth/callback"));
        assert!(is_valid_redirect_uri("http://127.0.0.1:3000/cb"));
        assert!(is_valid_redirect_uri("http://[::1]:3000/cb"));

        assert!(!is_valid_redirect_uri("http://evil.example/cb"));
        assert!(!is_valid_redirect_uri("http://localhost.evil.example/cb"));
        assert!(!is_valid_redirect_uri("https://app.example/cb#frag"));
        assert!(!is_valid_redirect_uri("javascript:alert(1)"));
        assert!(!is_valid_redirect_uri("not a url"));
    }

    #[test]
    fn public_client_gets_no_secret() {
        let registry = ClientRegistry::new();
        let client = registry
            .register(metadata(&["http://localhost:3000/cb"], Some("none")))
            .unwrap();

        assert!(client.client_id.starts_with("mcpc_"));
        assert_eq!(client.client_secret, None);
        assert_eq!(client.grant_types, vec!["authorization_code"]);
        assert_eq!(registry.get(&client.client_id), Some(client));
    }

    #[test]
    fn confidential_client_must_present_secret() {
        let registry = ClientRegistry::new();
        let client = registry
            .register(metadata(&["https://app.example/cb"], None))
            .unwrap();
        assert_eq!(client.token_endpoint_auth_method, "client_secret_basic");
        let secret = client.client_secret.clone().unwrap();

        let id = Some(client.client_id.as_str());
        assert!(registry.authenticate(id, Some(&secret)).is_ok());
        assert_eq!(registry.authenticate(id, None).unwrap_err().error, "invalid_client");
        assert_eq!(registry.authenticate(id, Some("guess")).unwrap_err().error, "invalid_client");
        assert_eq!(
            registry.authenticate(Some("made-up"), None).unwrap_err().error,
            "invalid_client"
        );
    }

    #[test]
    fn registration_rejects_bad_metadata() {
        let registry = ClientRegistry::new();
        assert_eq!(
            registry.register(metadata(&[], Some("none"))).unwrap_err().error,
            "invalid_redirect_uri"
        );
        assert_eq!(
            registry
                .register(metadata(&["http://evil.example/cb"], Some("none")))
                .unwrap_err()
                .error,
            "invalid_redirect_uri"
        );
        assert_eq!(
            registry
                .register(metadata(&["https://app.example/cb"], Some("private_key_jwt")))
                .unwrap_err()
                .error,
            "invalid_client_metadata"
        );

        let mut implicit = metadata(&["https://app.example/cb"], Some("none"));
        implicit.response_types = vec!["token".to_string()];
        assert_eq!(registry.register(implicit).unwrap_err().error, "invalid_client_metadata");
    }

    #[test]
    fn authorize_requires_registered_client_and_redirect() {
        let registry = ClientRegistry::new();
        let client = registry
            .register(metadata(&["http://localhost:3000/cb"], Some("none")))
            .unwrap();

        let made_up = AuthorizationRequest::for_client("c1");
        assert!(matches!(
            registry.authorize(made_up),
            Err(Error::InvalidRequest(msg)) if msg == "Invalid client"
        ));

        let mut evil = AuthorizationRequest::for_client(client.client_id.clone());
        evil.redirect_uri = Some("https://attacker.example/steal".to_string());
        assert!(matches!(
            registry.authorize(evil),
            Err(Error::InvalidRequest(msg)) if msg == "Invalid redirect URI"
        ));

        let defaulted = registry
            .authorize(AuthorizationRequest::for_client(client.client_id.clone()))
            .unwrap();
        assert_eq!(defaulted.redirect_uri.as_deref(), Some("http://localhost:3000/cb"));
    }

    #[test]
    fn several_redirects_require_an_explicit_choice() {
        let registry = ClientRegistry::new();
        let client = registry
            .register(metadata(
                &["http://localhost:3000/cb", "https://app.example/cb"],
                Some("none"),
            ))
            .unwrap();

        let result = registry.authorize(AuthorizationRequest::for_client(client.client_id.clone()));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        let mut request = AuthorizationRequest::for_client(client.client_id);
        request.redirect_uri = Some("https://app.example/cb".to_string());
        assert!(registry.authorize(request).is_ok());
    }
}
