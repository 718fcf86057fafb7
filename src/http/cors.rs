//! CORS decoration.
//!
//! # Responsibilities
//! - Answer preflight requests that no `OPTIONS` route handles
//! - Add CORS headers to every response of a request carrying `Origin`
//!
//! # Design Decisions
//! - An HTTP API CORS configuration replaces the default origin echo
//! - Headers already present on the response are never overwritten

use axum::http::{Method, StatusCode};

use crate::config::{GatewayConfig, HttpApiCorsConfig, RouteCorsConfig};
use crate::events::snapshot::RequestSnapshot;
use crate::response::ResponseEnvelope;

const DEFAULT_EXPOSE_HEADERS: &str = "content-type, content-length, etag";
const DEFAULT_MAX_AGE: u64 = 600;

/// CORS behaviour of the HTTP listener.
#[derive(Debug, Clone, Default)]
pub enum CorsPolicy {
    /// Echo the request origin and allow credentials.
    #[default]
    Echo,
    /// Explicit HTTP API configuration.
    HttpApi(HttpApiCorsConfig),
}

impl CorsPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        match &config.http_api.cors {
            Some(cors) => Self::HttpApi(cors.clone()),
            None => Self::Echo,
        }
    }

    /// True when the request is a CORS preflight.
    pub fn is_preflight(request: &RequestSnapshot) -> bool {
        request.method == Method::OPTIONS
            && request.header("origin").is_some()
            && request.header("access-control-request-method").is_some()
    }

    /// Gateway-generated answer to a preflight request.
    pub fn preflight(&self, request: &RequestSnapshot) -> ResponseEnvelope {
        let status = match self {
            Self::Echo => StatusCode::OK,
            Self::HttpApi(_) => StatusCode::NO_CONTENT,
        };
        let mut envelope = ResponseEnvelope::new(status);
        self.decorate(request, None, &mut envelope);
        envelope
    }

    /// Add CORS headers for `request` to `envelope`.
    pub fn decorate(&self, request: &RequestSnapshot, route_cors: Option<&RouteCorsConfig>, envelope: &mut ResponseEnvelope) {
        let Some(origin) = request.header("origin") else {
            return;
        };
        match self {
            Self::HttpApi(config) => decorate_http_api(config, request, origin, envelope),
            Self::Echo => decorate_echo(request, origin, route_cors, envelope),
        }
    }
}

fn decorate_echo(request: &RequestSnapshot, origin: &str, route_cors: Option<&RouteCorsConfig>, envelope: &mut ResponseEnvelope) {
    if let Some(cors) = route_cors {
        if !origin_allowed(&cors.origins, origin) {
            tracing::debug!(origin = %origin, "Origin not allowed by route CORS settings");
            return;
        }
        if !cors.headers.is_empty() {
            envelope.set_header_if_absent("access-control-allow-headers", cors.headers.join(","));
        }
    }

    envelope.set_header_if_absent("access-control-allow-origin", origin);
    envelope.set_header_if_absent("access-control-allow-credentials", "true");

    if request.method == Method::OPTIONS {
        let expose = request
            .header("access-control-expose-headers")
            .unwrap_or(DEFAULT_EXPOSE_HEADERS)
            .to_string();
        envelope.set_header_if_absent("access-control-expose-headers", expose);
        envelope.set_header_if_absent("access-control-max-age", DEFAULT_MAX_AGE.to_string());
        if let Some(headers) = request.header("access-control-request-headers") {
            envelope.set_header_if_absent("access-control-allow-headers", headers);
        }
        if let Some(method) = request.header("access-control-request-method") {
            envelope.set_header_if_absent("access-control-allow-methods", method);
        }
    }
}

fn decorate_http_api(config: &HttpApiCorsConfig, request: &RequestSnapshot, origin: &str, envelope: &mut ResponseEnvelope) {
    if !origin_allowed(&config.allowed_origins, origin) {
        tracing::debug!(origin = %origin, "Origin not in HTTP API allow list");
        return;
    }
    envelope.set_header_if_absent("access-control-allow-origin", origin);
    if config.allow_credentials {
        envelope.set_header_if_absent("access-control-allow-credentials", "true");
    }
    if !config.exposed_response_headers.is_empty() {
        envelope.set_header_if_absent("access-control-expose-headers", config.exposed_response_headers.join(","));
    }

    if request.method == Method::OPTIONS {
        if let Some(max_age) = config.max_age {
            envelope.set_header_if_absent("access-control-max-age", max_age.to_string());
        }
        if !config.allowed_methods.is_empty() {
            envelope.set_header_if_absent("access-control-allow-methods", config.allowed_methods.join(","));
        }
        if !config.allowed_headers.is_empty() {
            envelope.set_header_if_absent("access-control-allow-headers", config.allowed_headers.join(","));
        }
    }
}

fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|o| o == "*" || o == origin)
}
