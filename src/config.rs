//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MCP_AUTH_BRIDGE_";

/// Longest lifetime accepted for the flow cookies
pub const MAX_COOKIE_AGE: Duration = Duration::from_secs(1800);

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream identity provider
    pub identity: IdentityConfig,
    /// Backend management API
    pub backend: BackendConfig,
    /// Flow cookie settings
    pub cookies: CookieConfig,
    /// Outbound HTTP client settings
    pub http: HttpConfig,
    /// Downstream grant settings
    pub grants: GrantsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public origin (e.g. `https://mcp.example.com`) used to build the
    /// federated callback URL. Derived from the `Host` header when unset.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8788,
            public_url: None,
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity project reference
    pub project_id: String,
    /// Public client key sent as the `apikey` header
    pub client_id: String,
    /// Override for the identity base URL
    pub base_url: Option<String>,
    /// Override for the PKCE verifier cookie name
    pub verifier_cookie: Option<String>,
}

impl IdentityConfig {
    /// Identity base URL (`https://{project_id}.supabase.co` unless overridden)
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        self.base_url.as_ref().map_or_else(
            || Self::project_base_url(&self.project_id),
            |url| url.trim_end_matches('/').to_string(),
        )
    }

    /// Hosted identity base URL of a project
    #[must_use]
    pub fn project_base_url(project_id: &str) -> String {
        format!("https://{project_id}.supabase.co")
    }

    /// Name of the cookie holding the PKCE verifier during federated login
    #[must_use]
    pub fn verifier_cookie_name(&self) -> String {
        self.verifier_cookie
            .clone()
            .unwrap_or_else(|| format!("sb-{}-auth-token-code-verifier", self.project_id))
    }
}

/// Backend management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL prepended to relative endpoints
    pub base_url: String,
    /// Key-custody service used by `create-shield-keys`
    pub shield_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openfort.io/v1".to_string(),
            shield_url: "https://shield.openfort.io".to_string(),
        }
    }
}

/// Cookie configuration for the authorization flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Signing key for the state cookie.
    /// Supports: literal value, `env:VAR_NAME`, or unset (random per process)
    pub secret: Option<String>,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Lifetime of the flow cookies, at most 30 minutes
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secure: true,
            max_age: Duration::from_secs(1800),
        }
    }
}

impl CookieConfig {
    /// Resolve the signing secret (expand `env:` references)
    #[must_use]
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret.as_ref().and_then(|secret| {
            if let Some(var_name) = secret.strip_prefix("env:") {
                env::var(var_name).ok()
            } else {
                Some(secret.clone())
            }
        })
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Downstream grant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantsConfig {
    /// How long an issued authorization code stays redeemable
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
    /// How long a bearer issued at `POST /token` stays valid
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for GrantsConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} expansion can see them
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Check that the identity provider is configured and lifetimes are sane
    pub fn validate(&self) -> Result<()> {
        if self.identity.project_id.trim().is_empty() {
            return Err(Error::Config("identity.project_id is required".to_string()));
        }
        if self.identity.client_id.trim().is_empty() {
            return Err(Error::Config("identity.client_id is required".to_string()));
        }
        if self.cookies.max_age.is_zero() || self.cookies.max_age > MAX_COOKIE_AGE {
            return Err(Error::Config(format!(
                "cookies.max_age must be between 1s and {}s",
                MAX_COOKIE_AGE.as_secs()
            )));
        }
        if self.grants.code_ttl.is_zero() || self.grants.session_ttl.is_zero() {
            return Err(Error::Config(
                "grants.code_ttl and grants.session_ttl must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.identity.project_id = Self::expand_string(&re, &self.identity.project_id);
        self.identity.client_id = Self::expand_string(&re, &self.identity.client_id);
        if let Some(url) = self.identity.base_url.as_mut() {
            *url = Self::expand_string(&re, url);
        }
        self.backend.base_url = Self::expand_string(&re, &self.backend.base_url);
        self.backend.shield_url = Self::expand_string(&re, &self.backend.shield_url);
        if let Some(secret) = self.cookies.secret.as_mut() {
            *secret = Self::expand_string(&re, secret);
        }
        Ok(())
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "1500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "24h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s" so "100ms" isn't read as seconds
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
