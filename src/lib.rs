//! MCP auth bridge library
//!
//! Lets an MCP client obtain delegated access to a backend management API.
//! The user authenticates against an upstream identity provider (password,
//! federated login or PKCE code exchange); the provider tokens become the
//! session's props, and every tool call uses them, renewing the access token
//! once when the backend rejects it.
//!
//! # Modules
//!
//! - [`oauth`]: authorization flow, state cookie, identity client, grants
//! - [`api`]: backend client with renewal and single retry
//! - [`tools`]: project management tools
//! - [`server`]: axum router and server bootstrap

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod oauth;
pub mod server;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialized: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialized: {e}")))?,
    }

    Ok(())
}
