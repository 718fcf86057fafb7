//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build the dispatcher and both servers
//! - Bind listeners and spawn the server tasks
//!
//! # Design Decisions
//! - Fail fast: validation, TLS and bind errors are fatal
//! - Listeners bind before tasks spawn (traffic only when ready)
//! - The caller supplies the `Invoker`, so tests run the whole gateway
//!   in-process

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use super::shutdown::Shutdown;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::GatewayConfig;
use crate::events::EnvironmentOverrides;
use crate::http::{AppState, HttpServer};
use crate::invoke::{Dispatcher, Invoker};
use crate::net::{self, ListenerError};
use crate::websocket::{WebSocketServer, WsState};

/// Reasons the gateway cannot start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(std::io::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A running gateway.
pub struct Gateway {
    pub http_addr: SocketAddr,
    pub websocket_addr: Option<SocketAddr>,
    pub state: AppState,
    pub websocket: Option<WsState>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Stop both listeners and wait for their tasks.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Server task failed");
            }
        }
        tracing::info!("Gateway stopped");
    }
}

/// Start the gateway described by `config`.
pub async fn start(
    config: &GatewayConfig,
    invoker: Arc<dyn Invoker>,
    overrides: EnvironmentOverrides,
) -> Result<Gateway, StartupError> {
    validate_config(config).map_err(StartupError::Invalid)?;

    let dispatcher = Dispatcher::new(
        invoker,
        config.functions.clone(),
        Duration::from_secs(config.invoker.timeout_secs),
    );
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    let server = HttpServer::new(config, dispatcher.clone(), overrides);
    let state = server.state();
    for route in state.routes.describe() {
        tracing::info!(route = %route, "Route registered");
    }

    let (listener, http_addr) = net::bind(&config.listener.bind_address).await?;

    let signal = shutdown.subscribe();
    match &config.listener.tls {
        Some(tls) => {
            let tls = net::load_tls_config(tls).await.map_err(StartupError::Tls)?;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run_tls(listener, tls, signal).await {
                    tracing::error!(error = %e, "HTTPS server error");
                }
            }));
        }
        None => {
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(listener, signal).await {
                    tracing::error!(error = %e, "HTTP server error");
                }
            }));
        }
    }

    let (websocket_addr, websocket) = if config.websocket.enabled {
        let server = WebSocketServer::new(config, dispatcher, Arc::clone(&state.stage));
        let websocket = server.state();
        let (listener, addr) = net::bind(&config.websocket.bind_address).await?;
        let signal = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(listener, signal).await {
                tracing::error!(error = %e, "WebSocket server error");
            }
        }));
        (Some(addr), Some(websocket))
    } else {
        (None, None)
    };

    tracing::info!(
        http = %http_addr,
        websocket = ?websocket_addr,
        stage = %state.stage.name,
        "Gateway ready"
    );

    Ok(Gateway {
        http_addr,
        websocket_addr,
        state,
        websocket,
        shutdown,
        tasks,
    })
}
