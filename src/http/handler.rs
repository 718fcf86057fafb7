//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! axum Request
//!     → RequestSnapshot (stored in the replay slot)
//!     → CORS preflight answered by the gateway when no OPTIONS route exists
//!     → RouteTable::match_request (404 reply otherwise)
//!     → authorizer (custom or JWT)
//!     → API key check (private routes)
//!     → payload parse + request schema check
//!     → events::synthesize
//!     → Dispatcher::invoke
//!     → response::map_response
//!     → CORS decoration, Set-Cookie, axum Response
//! ```
//!
//! # Design Decisions
//! - Every failure becomes a response; nothing here returns an error
//! - The replayed snapshot goes through exactly the same steps

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::Instrument;

use super::api_key;
use super::cors::CorsPolicy;
use super::server::AppState;
use crate::auth::{custom, jwt, AuthorizerDescriptor, AuthorizerOutcome, Credentials};
use crate::events::identity::new_request_id;
use crate::events::{parse_payload, synthesize, EventInput, RequestSnapshot};
use crate::observability::metrics;
use crate::response::{map_response, MappingInput, ResponseEnvelope};
use crate::routing::{IntegrationKind, RouteMatch};

/// Catch-all axum handler.
pub async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %parts.uri.path(), error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let snapshot = RequestSnapshot::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query(),
        &parts.headers,
        body,
        addr,
    );
    state.replay.store(Some(Arc::new(snapshot.clone())));
    process(&state, snapshot).await
}

/// Run the last captured request through the pipeline again.
pub async fn replay_last(state: &AppState) -> Option<Response> {
    let snapshot = state.replay.load_full()?;
    tracing::info!(method = %snapshot.method, path = %snapshot.path, "Replaying last request");
    Some(process(state, (*snapshot).clone()).await)
}

/// Turn one request snapshot into a response.
pub async fn process(state: &AppState, request: RequestSnapshot) -> Response {
    let started = Instant::now();
    let span = tracing::info_span!(
        "request",
        request_id = %new_request_id(),
        method = %request.method,
        path = %request.path,
    );
    async move {
        let (envelope, route_label) = pipeline(state, &request).await;
        metrics::record_request(request.method.as_str(), envelope.status.as_u16(), &route_label, started);
        tracing::info!(
            status = envelope.status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        envelope.into_http(state.secure_cookies)
    }
    .instrument(span)
    .await
}

async fn pipeline(state: &AppState, request: &RequestSnapshot) -> (ResponseEnvelope, String) {
    if CorsPolicy::is_preflight(request) && !state.routes.has_options_route(&request.path) {
        tracing::debug!("Answering CORS preflight");
        return (state.cors.preflight(request), "preflight".to_string());
    }

    let Some(matched) = state.routes.match_request(&request.method, &request.path) else {
        tracing::warn!("No route matched");
        let mut envelope = not_found(state, request);
        state.cors.decorate(request, None, &mut envelope);
        return (envelope, "none".to_string());
    };

    let route_label = matched.route.route_key.clone();
    let mut envelope = match handle_route(state, request, &matched).await {
        Ok(envelope) | Err(envelope) => envelope,
    };
    state.cors.decorate(request, matched.route.cors.as_ref(), &mut envelope);
    (envelope, route_label)
}

async fn handle_route(
    state: &AppState,
    request: &RequestSnapshot,
    matched: &RouteMatch,
) -> Result<ResponseEnvelope, ResponseEnvelope> {
    let route = &matched.route;
    tracing::info!(function = %route.function, route = %route.route_key, "Route matched");

    let credentials = authorize(state, request, matched).await?;

    if route.private && !state.no_auth && !state.api_keys.is_allowed(request, credentials.as_ref()) {
        tracing::info!(function = %route.function, "Missing or invalid API key");
        return Err(api_key::forbidden());
    }

    let payload = parse_payload(request);
    let media_type = request.media_type().unwrap_or_else(|| "application/json".to_string());
    if let Some(schema) = route.request_schemas.get(&media_type) {
        let errors = schema.errors(&payload);
        if !errors.is_empty() {
            tracing::info!(content_type = %media_type, errors = ?errors, "Request body failed schema validation");
            return Err(ResponseEnvelope::json(
                StatusCode::BAD_REQUEST,
                &json!({"message": "Invalid request body"}),
            ));
        }
    }

    let event = synthesize(&EventInput {
        request,
        route: matched,
        stage: &state.stage,
        credentials: credentials.as_ref(),
        payload: &payload,
    })
    .map_err(|e| {
        tracing::error!(function = %route.function, error = %e, cause = ?std::error::Error::source(&e), "Event synthesis failed");
        let status = match route.integration {
            IntegrationKind::Template => StatusCode::BAD_GATEWAY,
            IntegrationKind::ProxyV1 | IntegrationKind::ProxyV2 => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ResponseEnvelope::gateway_error(status, &e.to_string(), "SynthesisError", &[])
    })?;

    let outcome = state
        .dispatcher
        .invoke(&route.function, event)
        .await
        .map(|output| output.result);

    map_response(
        &MappingInput {
            request,
            route: matched,
            stage: &state.stage,
        },
        outcome,
    )
    .map_err(|e| {
        tracing::error!(function = %route.function, error = %e, "Function result does not fit the response contract");
        e.to_envelope()
    })
}

async fn authorize(
    state: &AppState,
    request: &RequestSnapshot,
    matched: &RouteMatch,
) -> Result<Option<Credentials>, ResponseEnvelope> {
    let (name, outcome) = match &matched.route.authorizer {
        AuthorizerDescriptor::None => return Ok(None),
        AuthorizerDescriptor::Custom(authorizer) => (
            authorizer.name.as_str(),
            custom::authenticate(authorizer, request, matched, &state.stage, &state.dispatcher).await,
        ),
        AuthorizerDescriptor::Jwt(authorizer) => (authorizer.name.as_str(), jwt::authenticate(authorizer, request)),
    };
    metrics::record_authorizer(name, outcome.label());

    match outcome {
        AuthorizerOutcome::Allow(credentials) => Ok(Some(credentials)),
        AuthorizerOutcome::Deny(rejection) => Err(boom(rejection.status, &rejection.message)),
        AuthorizerOutcome::Error(_) => {
            let mut envelope = boom(StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred");
            envelope.append_header("x-amzn-ErrorType", "AuthorizerConfigurationException");
            Err(envelope)
        }
    }
}

/// Error reply in the `{statusCode, error, message}` shape.
pub fn boom(status: StatusCode, message: &str) -> ResponseEnvelope {
    ResponseEnvelope::json(
        status,
        &json!({
            "statusCode": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Unknown"),
            "message": message,
        }),
    )
}

fn not_found(state: &AppState, request: &RequestSnapshot) -> ResponseEnvelope {
    ResponseEnvelope::json(
        StatusCode::NOT_FOUND,
        &json!({
            "currentRoute": format!("{} - {}", request.method.as_str().to_ascii_lowercase(), request.path),
            "error": "Serverless-offline: route not found.",
            "existingRoutes": state.routes.describe(),
            "statusCode": 404,
        }),
    )
}
