//! MCP auth bridge - OAuth bridging between MCP clients and an identity provider

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_auth_bridge::{
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> mcp_auth_bridge::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(ref public_url) = cli.public_url {
        config.server.public_url = Some(public_url.clone());
    }
    Ok(config)
}

/// Validate configuration and print a summary
fn check_config(config: &Config) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    println!("✅ Configuration is valid\n");
    println!("Listen:          {}:{}", config.server.host, config.server.port);
    println!(
        "Public URL:      {}",
        config.server.public_url.as_deref().unwrap_or("(from Host header)")
    );
    println!("Identity:        {}", config.identity.resolved_base_url());
    println!("Verifier cookie: {}", config.identity.verifier_cookie_name());
    println!("Backend:         {}", config.backend.base_url);
    println!(
        "Cookie secret:   {}",
        if config.cookies.resolve_secret().is_some() {
            "configured"
        } else {
            "per-process (random)"
        }
    );
    println!("Code TTL:        {}s", config.grants.code_ttl.as_secs());
    ExitCode::SUCCESS
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        project_id = %config.identity.project_id,
        "Starting MCP auth bridge"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
