//! CRM Sync - Main Server
//!
//! Owner-scoped CRM data access over HTTP and WebSocket.

use anyhow::Result;
use clap::{Parser, Subcommand};
use crm_sync::{mapper::MalformedPolicy, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crm-sync")]
#[command(about = "Owner-scoped CRM sync server")]
struct Cli {
    /// YAML config file; environment variables override its values
    #[arg(short, long, global = true, env = "CRM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// How subscriptions treat malformed documents: skip_and_log | abort_snapshot
        #[arg(long)]
        malformed_policy: Option<MalformedPolicy>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crm_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            malformed_policy,
        } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            if let Some(host) = host {
                config.server_host = host;
            }
            if let Some(policy) = malformed_policy {
                config.malformed_policy = policy;
            }
            crm_sync::start_server(config).await
        }
    }
}
