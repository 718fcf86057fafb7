//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared `AppState` once from configuration
//! - Create the axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, body limit)
//! - Serve plain TCP or TLS with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::api_key::ApiKeys;
use super::cors::CorsPolicy;
use super::handler::gateway_handler;
use crate::config::GatewayConfig;
use crate::events::{EnvironmentOverrides, RequestSnapshot, Stage};
use crate::invoke::Dispatcher;
use crate::routing::RouteTable;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub dispatcher: Dispatcher,
    pub stage: Arc<Stage>,
    pub api_keys: Arc<ApiKeys>,
    pub cors: Arc<CorsPolicy>,
    /// Last request received, for replay.
    pub replay: Arc<ArcSwapOption<RequestSnapshot>>,
    pub no_auth: bool,
    pub secure_cookies: bool,
    pub max_body_size: usize,
}

impl AppState {
    pub fn new(config: &GatewayConfig, dispatcher: Dispatcher, overrides: EnvironmentOverrides) -> Self {
        let routes = RouteTable::from_config(config);
        if routes.is_empty() {
            tracing::warn!("No HTTP routes registered");
        }
        Self {
            routes: Arc::new(routes),
            dispatcher,
            stage: Arc::new(Stage::new(&config.gateway, overrides)),
            api_keys: Arc::new(ApiKeys::from_settings(&config.gateway)),
            cors: Arc::new(CorsPolicy::from_config(config)),
            replay: Arc::new(ArcSwapOption::empty()),
            no_auth: config.gateway.no_auth,
            secure_cookies: config.gateway.enforce_secure_cookies,
            max_body_size: config.listener.max_body_size,
        }
    }
}

/// HTTP listener of the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &GatewayConfig, dispatcher: Dispatcher, overrides: EnvironmentOverrides) -> Self {
        let state = AppState::new(config, dispatcher, overrides);
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let body_limit = state.max_body_size;
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(body_limit)),
            )
    }

    /// Shared state, used by the replay command.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server on a bound listener until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, stage = %self.state.stage.name, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS on a bound listener until `shutdown` fires.
    pub async fn run_tls(
        self,
        listener: TcpListener,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, stage = %self.state.stage.name, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            signal.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::from_tcp_rustls(listener.into_std()?, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}
