//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP auth bridge - OAuth for MCP clients on top of an upstream identity provider
#[derive(Parser, Debug)]
#[command(name = "mcp-auth-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_AUTH_BRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_AUTH_BRIDGE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_AUTH_BRIDGE_HOST")]
    pub host: Option<String>,

    /// Public origin used for the federated callback URL
    #[arg(long, env = "MCP_AUTH_BRIDGE_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_AUTH_BRIDGE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_AUTH_BRIDGE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bridge server (default)
    Serve,

    /// Load and validate configuration, then print a summary
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["mcp-auth-bridge"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_overrides_and_subcommand() {
        let cli = Cli::try_parse_from([
            "mcp-auth-bridge",
            "--port",
            "9000",
            "--public-url",
            "https://bridge.example",
            "check-config",
            "--config",
            "bridge.yaml",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.public_url.as_deref(), Some("https://bridge.example"));
        assert_eq!(cli.config, Some(PathBuf::from("bridge.yaml")));
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
    }
}
