//! Bridge server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::router::{AppState, create_router};
use crate::api::ApiClient;
use crate::config::Config;
use crate::oauth::{AuthFlow, ClientRegistry, CompletionPort, InMemoryGrants};
use crate::tools::Toolbox;
use crate::{Error, Result};

/// How often expired codes and sessions are dropped
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// MCP auth bridge server
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a server from validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build the shared state the router runs on
    pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
        let clients = Arc::new(ClientRegistry::new());
        let grants = Arc::new(InMemoryGrants::new(
            Arc::clone(&clients),
            config.grants.code_ttl,
            config.grants.session_ttl,
        ));
        let port: Arc<dyn CompletionPort> = grants.clone();
        let flow = AuthFlow::from_config(config, Arc::clone(&clients), port)?;
        let toolbox = Toolbox::new(ApiClient::from_config(config)?)
            .with_shield_url(&config.backend.shield_url);

        Ok(Arc::new(AppState::new(
            flow,
            clients,
            grants,
            toolbox,
            config.server.public_url.clone(),
        )))
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let state = Self::build_state(&self.config)?;
        spawn_reaper(Arc::clone(&state), REAP_INTERVAL, shutdown_tx.subscribe());

        let app = create_router(state);
        let listener = TcpListener::bind(addr).await?;

        info!("MCP AUTH BRIDGE v{}", env!("CARGO_PKG_VERSION"));
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            project_id = %self.config.identity.project_id,
            backend = %self.config.backend.base_url,
            "Bridging identity provider to backend"
        );
        match &self.config.server.public_url {
            Some(url) => info!(public_url = %url, "Federated callback origin"),
            None => info!("Federated callback origin taken from the Host header"),
        }
        if !self.config.cookies.secure {
            warn!("Flow cookies are sent without the Secure attribute");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Spawn a background task that drops expired codes and sessions every
/// `interval`. The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    state: Arc<AppState>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    state.reap_expired();
                }
                _ = shutdown.recv() => {
                    debug!("Reaper shutting down");
                    break;
                }
            }
        }
    });
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
