//! apigw-offline
//!
//! Local API Gateway emulator: serves REST, HTTP API and WebSocket routes on
//! local ports and hands each request to a Lambda-compatible function
//! runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ net listener ──▶ http server ──▶ routing ──▶ auth
//!                                                          │
//!                                                          ▼
//!                                                  events (synthesize)
//!                                                          │
//!                                                          ▼
//!     Client Response                               invoke (Dispatcher)
//!     ◀────── response (map) ◀─────────────────────────────┘
//!
//!     WebSocket client ◀──▶ websocket server ──▶ invoke
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use apigw_offline::config::{load_config, GatewayConfig};
use apigw_offline::events::EnvironmentOverrides;
use apigw_offline::http::{replay_last, AppState};
use apigw_offline::invoke::HttpInvoker;
use apigw_offline::lifecycle::{signals, startup};
use apigw_offline::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "apigw-offline")]
#[command(about = "Emulate API Gateway locally in front of Lambda-compatible functions", long_about = None)]
struct Cli {
    /// Gateway configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listener port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the stage name.
    #[arg(short, long)]
    stage: Option<String>,

    /// Skip every authorizer and API key check.
    #[arg(long)]
    no_auth: bool,
}

impl Cli {
    fn apply(&self, config: &mut GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = self.port {
            let mut addr: SocketAddr = config.listener.bind_address.parse()?;
            addr.set_port(port);
            config.listener.bind_address = addr.to_string();
        }
        if let Some(stage) = &self.stage {
            config.gateway.stage = stage.clone();
        }
        if self.no_auth {
            config.gateway.no_auth = true;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    cli.apply(&mut config)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "apigw-offline starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        stage = %config.gateway.stage,
        routes = config.routes.len(),
        invoker = %config.invoker.endpoint,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let invoker = Arc::new(HttpInvoker::new(config.invoker.endpoint.clone())?);
    let gateway = startup::start(&config, invoker, EnvironmentOverrides::from_env()).await?;

    tokio::spawn(replay_commands(gateway.state.clone()));

    signals::wait_for_signal().await;
    gateway.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// `rp` on stdin replays the last request.
async fn replay_commands(state: AppState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == "rp" => match replay_last(&state).await {
                Some(response) => tracing::info!(status = response.status().as_u16(), "Replayed last request"),
                None => tracing::info!("No request to replay"),
            },
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading stdin");
                break;
            }
        }
    }
}
