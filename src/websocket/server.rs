//! WebSocket listener: handshake, message routing and `@connections`.
//!
//! # Responsibilities
//! - Authorize and accept `$connect` handshakes
//! - Route client messages by the selection expression
//! - Fire `$disconnect` when a client goes away
//! - Close idle and long-lived connections
//! - Serve the `@connections` management API on the same listener

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use super::connections::{Connection, ConnectionRegistry, Outbound, CLOSE_GOING_AWAY};
use crate::auth::custom::evaluate;
use crate::auth::{AuthorizerDescriptor, AuthorizerOutcome, CustomAuthorizer, CustomKind};
use crate::config::{ApiKind, GatewayConfig};
use crate::events::identity::new_request_id;
use crate::events::websocket::{
    attach_auth, authorizer_event, connect_event, connect_method_arn, disconnect_event, message_event,
    ConnectionAuth,
};
use crate::events::{RequestSnapshot, Stage};
use crate::invoke::Dispatcher;
use crate::mapping::json_path;
use crate::observability::metrics;

pub const CONNECT_ROUTE: &str = "$connect";
pub const DISCONNECT_ROUTE: &str = "$disconnect";
pub const DEFAULT_ROUTE: &str = "$default";

/// Timeout value standing in for "never" (tokio clamps far deadlines).
const NEVER: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

#[derive(Debug, Clone)]
struct WsRoute {
    function: String,
    echo_body: bool,
}

/// State shared by the upgrade handler, socket tasks and `@connections`.
#[derive(Clone)]
pub struct WsState {
    routes: Arc<BTreeMap<String, WsRoute>>,
    connect_authorizer: Option<Arc<CustomAuthorizer>>,
    dispatcher: Dispatcher,
    registry: Arc<ConnectionRegistry>,
    stage: Arc<Stage>,
    selection_expression: Arc<str>,
    idle_timeout: Duration,
    hard_timeout: Duration,
}

impl WsState {
    pub fn new(config: &GatewayConfig, dispatcher: Dispatcher, stage: Arc<Stage>) -> Self {
        let websocket = &config.websocket;
        let routes = websocket
            .routes
            .iter()
            .map(|route| {
                if route.authorizer.is_some() && route.route != CONNECT_ROUTE {
                    tracing::warn!(route = %route.route, "Authorizers are only supported on $connect, ignoring");
                }
                let echo_body = route.route_response_selection_expression.as_deref() == Some(DEFAULT_ROUTE);
                (
                    route.route.clone(),
                    WsRoute {
                        function: route.function.clone(),
                        echo_body,
                    },
                )
            })
            .collect();

        Self {
            routes: Arc::new(routes),
            connect_authorizer: connect_authorizer(config).map(Arc::new),
            dispatcher,
            registry: Arc::new(ConnectionRegistry::new()),
            stage,
            selection_expression: Arc::from(websocket.route_selection_expression.as_str()),
            idle_timeout: timeout(websocket.idle_timeout_secs),
            hard_timeout: timeout(websocket.hard_timeout_secs),
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }
}

fn timeout(secs: u64) -> Duration {
    if secs == 0 {
        NEVER
    } else {
        Duration::from_secs(secs)
    }
}

/// REQUEST authorizer guarding `$connect`, if one is configured and usable.
fn connect_authorizer(config: &GatewayConfig) -> Option<CustomAuthorizer> {
    if config.gateway.no_auth {
        return None;
    }
    let route = config.websocket.routes.iter().find(|r| r.route == CONNECT_ROUTE)?;
    let name = route.authorizer.as_deref()?;
    let Some(authorizer) = config.authorizers.get(name) else {
        tracing::warn!(authorizer = %name, "Unknown $connect authorizer, connections are not authorized");
        return None;
    };
    match AuthorizerDescriptor::from_config(name, authorizer, ApiKind::Rest, &[]) {
        Ok(AuthorizerDescriptor::Custom(custom)) if custom.kind == CustomKind::Request => {
            tracing::info!(authorizer = %name, function = %custom.function, "Configuring $connect authorizer");
            Some(custom)
        }
        Ok(AuthorizerDescriptor::Custom(_)) => {
            tracing::warn!(authorizer = %name, "WebSocket APIs only support REQUEST authorizers, ignoring");
            None
        }
        Ok(_) => {
            tracing::warn!(authorizer = %name, "Unsupported $connect authorizer type, ignoring");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Invalid $connect authorizer, ignoring");
            None
        }
    }
}

/// Route key selected for a message body.
///
/// `$request.body.action` becomes the JSON path `$.action`; anything that is
/// not JSON, or selects something other than a non-empty string, routes to
/// `$default`.
pub fn select_route(expression: &str, body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return DEFAULT_ROUTE.to_string();
    };
    let path = expression.replacen("request.body", "", 1);
    match json_path::query(&json, &path) {
        Some(Value::String(route)) if !route.is_empty() => route,
        _ => DEFAULT_ROUTE.to_string(),
    }
}

/// WebSocket listener of the gateway.
pub struct WebSocketServer {
    router: Router,
    state: WsState,
}

impl WebSocketServer {
    pub fn new(config: &GatewayConfig, dispatcher: Dispatcher, stage: Arc<Stage>) -> Self {
        let state = WsState::new(config, dispatcher, stage);
        let router = Router::new()
            .route(
                "/@connections/{connection_id}",
                get(connection_info).post(post_to_connection).delete(delete_connection),
            )
            .route("/{*path}", any(upgrade_handler))
            .route("/", any(upgrade_handler))
            .with_state(state.clone())
            .layer(TraceLayer::new_for_http());
        Self { router, state }
    }

    pub fn state(&self) -> WsState {
        self.state.clone()
    }

    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.state.routes.len(), "WebSocket server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

async fn upgrade_handler(
    State(state): State<WsState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let connection_id = new_request_id();
    let connected_at = chrono::Utc::now().timestamp_millis();
    let request = RequestSnapshot::new(method, uri.path(), uri.query(), &headers, Bytes::new(), addr);

    let auth = match verify(&state, &request, &connection_id, connected_at).await {
        Ok(auth) => auth,
        Err(status) => {
            tracing::info!(connection_id = %connection_id, status = status.as_u16(), "WebSocket handshake refused");
            return status.into_response();
        }
    };

    let user_agent = request.header("user-agent").unwrap_or_default().to_string();
    let (connection, outbound) = Connection::new(connection_id, connected_at, request.source_ip.clone(), user_agent);
    upgrade
        .on_failed_upgrade(|e| tracing::debug!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| serve_connection(state, socket, Arc::new(connection), auth, outbound))
}

/// Run the `$connect` authorizer and handler. `Ok` carries the credentials
/// to cache once the socket is live; `Err` carries the handshake status to
/// refuse with.
async fn verify(
    state: &WsState,
    request: &RequestSnapshot,
    connection_id: &str,
    connected_at: i64,
) -> Result<Option<ConnectionAuth>, StatusCode> {
    let Some(route) = state.routes.get(CONNECT_ROUTE) else {
        tracing::warn!("No $connect route defined");
        return Err(StatusCode::BAD_GATEWAY);
    };

    let auth = match &state.connect_authorizer {
        Some(authorizer) => Some(authorize(state, authorizer, request, connection_id, connected_at).await?),
        None => None,
    };

    let mut event = connect_event(request, connection_id, connected_at);
    if let Some(auth) = &auth {
        attach_auth(&mut event, auth);
    }

    match state.dispatcher.invoke(&route.function, event).await {
        Ok(output) => {
            let status = output.result.get("statusCode").and_then(Value::as_u64);
            match status {
                Some(code) if (200..300).contains(&code) => Ok(auth),
                other => Err(other
                    .and_then(|code| u16::try_from(code).ok())
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .unwrap_or(StatusCode::BAD_GATEWAY)),
            }
        }
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "$connect handler failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

async fn authorize(
    state: &WsState,
    authorizer: &CustomAuthorizer,
    request: &RequestSnapshot,
    connection_id: &str,
    connected_at: i64,
) -> Result<ConnectionAuth, StatusCode> {
    let event = authorizer_event(request, connection_id, connected_at, &state.stage.region);
    let output = match state.dispatcher.invoke(&authorizer.function, event).await {
        Ok(output) => output,
        Err(e) => {
            metrics::record_authorizer(&authorizer.name, "error");
            tracing::error!(authorizer = %authorizer.name, error = %e, "$connect authorizer failed");
            return Err(if e.message == "Unauthorized" {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            });
        }
    };

    let outcome = evaluate(&output.result, &connect_method_arn(&state.stage.region), false);
    metrics::record_authorizer(&authorizer.name, outcome.label());
    match outcome {
        AuthorizerOutcome::Allow(credentials) => {
            let mut identity = Map::new();
            identity.insert(
                "apiKey".into(),
                credentials.usage_identifier_key.clone().map(Value::String).unwrap_or(Value::Null),
            );
            identity.insert("sourceIp".into(), Value::String(request.source_ip.clone()));
            identity.insert(
                "userAgent".into(),
                Value::String(request.header("user-agent").unwrap_or_default().to_string()),
            );
            Ok(ConnectionAuth {
                identity,
                authorizer: credentials.authorizer_map(),
            })
        }
        AuthorizerOutcome::Deny(rejection) => {
            tracing::info!(authorizer = %authorizer.name, reason = %rejection.message, "$connect denied");
            Err(rejection.status)
        }
        AuthorizerOutcome::Error(detail) => {
            tracing::error!(authorizer = %authorizer.name, detail = %detail, "$connect authorizer response invalid");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn serve_connection(
    state: WsState,
    socket: WebSocket,
    connection: Arc<Connection>,
    auth: Option<ConnectionAuth>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    if let Some(auth) = auth {
        state.registry.cache_auth(&connection.id, auth);
    }
    state.registry.insert(Arc::clone(&connection));
    metrics::websocket_connected();
    tracing::info!(connection_id = %connection.id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let idle = tokio::time::sleep(state.idle_timeout);
    let hard = tokio::time::sleep(state.hard_timeout);
    tokio::pin!(idle, hard);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let body = match incoming {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection.id, error = %e, "WebSocket read failed");
                        break;
                    }
                };
                idle.as_mut().reset(tokio::time::Instant::now() + state.idle_timeout);
                connection.touch();
                tokio::spawn(route_message(state.clone(), Arc::clone(&connection), body));
            }
            frame = outbound.recv() => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::Text(text.into()),
                    Some(Outbound::Binary(bytes)) => Message::Binary(bytes),
                    Some(Outbound::Close { code, reason }) => {
                        let _ = sink.send(close_frame(code, &reason)).await;
                        break;
                    }
                    None => break,
                };
                idle.as_mut().reset(tokio::time::Instant::now() + state.idle_timeout);
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            () = &mut idle => {
                tracing::info!(connection_id = %connection.id, "WebSocket idle timeout");
                let _ = sink.send(close_frame(CLOSE_GOING_AWAY, "Going away")).await;
                break;
            }
            () = &mut hard => {
                tracing::info!(connection_id = %connection.id, "WebSocket hard timeout");
                let _ = sink.send(close_frame(CLOSE_GOING_AWAY, "Going away")).await;
                break;
            }
        }
    }

    state.registry.remove(&connection.id);
    metrics::websocket_disconnected();
    tracing::info!(connection_id = %connection.id, "WebSocket disconnected");
    disconnect(&state, &connection).await;
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

async fn route_message(state: WsState, connection: Arc<Connection>, body: String) {
    let route_key = select_route(&state.selection_expression, &body);
    tracing::debug!(connection_id = %connection.id, route = %route_key, "WebSocket message");

    let Some(route) = state.routes.get(&route_key).or_else(|| state.routes.get(DEFAULT_ROUTE)) else {
        tracing::debug!(route = %route_key, "No WebSocket route for message");
        return;
    };

    let mut event = message_event(&body, &route_key, &connection.id, connection.connected_at);
    if let Some(auth) = state.registry.auth(&connection.id) {
        attach_auth(&mut event, &auth);
    }

    match state.dispatcher.invoke(&route.function, event).await {
        Ok(output) => {
            if !route.echo_body {
                return;
            }
            let reply = match output.result.get("body") {
                None | Some(Value::Null) => return,
                Some(Value::String(text)) if text.is_empty() => return,
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            };
            connection.touch();
            connection.send(Outbound::Text(reply));
        }
        Err(e) => {
            tracing::error!(connection_id = %connection.id, function = %route.function, error = %e, "WebSocket handler failed");
            let error = serde_json::json!({
                "connectionId": connection.id,
                "message": "Internal server error",
                "requestId": new_request_id(),
            });
            connection.send(Outbound::Text(error.to_string()));
        }
    }
}

async fn disconnect(state: &WsState, connection: &Connection) {
    if let Some(route) = state.routes.get(DISCONNECT_ROUTE) {
        let mut event = disconnect_event(&connection.id, connection.connected_at);
        if let Some(auth) = state.registry.auth(&connection.id) {
            attach_auth(&mut event, &auth);
        }
        if let Err(e) = state.dispatcher.invoke(&route.function, event).await {
            tracing::error!(connection_id = %connection.id, error = %e, "$disconnect handler failed");
        }
    }
    state.registry.forget_auth(&connection.id);
}

async fn post_to_connection(
    State(state): State<WsState>,
    Path(connection_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    let frame = match String::from_utf8(body.to_vec()) {
        Ok(text) => Outbound::Text(text),
        Err(_) => Outbound::Binary(body),
    };
    if state.registry.send(&connection_id, frame) {
        tracing::debug!(connection_id = %connection_id, "Sent data to connection");
        StatusCode::OK
    } else {
        StatusCode::GONE
    }
}

async fn delete_connection(State(state): State<WsState>, Path(connection_id): Path<String>) -> StatusCode {
    if state.registry.close(&connection_id) {
        tracing::debug!(connection_id = %connection_id, "Closed connection");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::GONE
    }
}

async fn connection_info(State(state): State<WsState>, Path(connection_id): Path<String>) -> Response {
    match state.registry.get(&connection_id) {
        Some(connection) => Json(connection.describe()).into_response(),
        None => StatusCode::GONE.into_response(),
    }
}
