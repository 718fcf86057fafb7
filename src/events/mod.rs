//! Event synthesis.
//!
//! # Data Flow
//! ```text
//! RequestSnapshot + RouteMatch + Credentials
//!     → synthesize (one branch per IntegrationKind)
//!         Template → template.rs (mapping template rendering)
//!         ProxyV1  → proxy_v1.rs
//!         ProxyV2  → proxy_v2.rs
//!     → serde_json::Value handed to the Invoker
//!
//! Authorizer and WebSocket events are built by authorizer.rs and
//! websocket.rs for their own callers.
//! ```
//!
//! # Design Decisions
//! - Proxy events are typed structs serialized once, so field names and
//!   presence (`null` vs. missing) are fixed at compile time
//! - Environment overrides arrive through `Stage`, never read per request

pub mod authorizer;
pub mod identity;
pub mod overrides;
pub mod proxy_v1;
pub mod proxy_v2;
pub mod snapshot;
pub mod template;
pub mod websocket;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::Credentials;
use crate::routing::{IntegrationKind, RouteMatch};
use crate::template::TemplateError;

pub use overrides::{EnvironmentOverrides, Stage};
pub use snapshot::RequestSnapshot;

/// Errors raised while building an event.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Error while parsing template \"{content_type}\" for {function}")]
    Template {
        content_type: String,
        function: String,
        #[source]
        source: TemplateError,
    },

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything known about a request when its event is built.
#[derive(Debug, Clone, Copy)]
pub struct EventInput<'a> {
    pub request: &'a RequestSnapshot,
    pub route: &'a RouteMatch,
    pub stage: &'a Stage,
    pub credentials: Option<&'a Credentials>,
    /// Parsed request payload, see [`parse_payload`].
    pub payload: &'a Value,
}

/// Build the event for the route's integration.
pub fn synthesize(input: &EventInput<'_>) -> Result<Value, SynthesisError> {
    match input.route.route.integration {
        IntegrationKind::Template => template::create(input),
        IntegrationKind::ProxyV1 => proxy_v1::create(input),
        IntegrationKind::ProxyV2 => proxy_v2::create(input),
    }
}

const JSON_MEDIA_TYPES: [&str; 2] = ["application/json", "application/vnd.api+json"];

/// Request payload as templates and schema checks see it.
///
/// JSON bodies are parsed; a body that fails to parse stays a string. Form
/// bodies become an object of their fields. Empty bodies are `null`.
pub fn parse_payload(request: &RequestSnapshot) -> Value {
    if request.body.is_empty() {
        return Value::Null;
    }
    let text = String::from_utf8_lossy(&request.body).into_owned();
    let media_type = request
        .media_type()
        .unwrap_or_else(|| "application/json".to_string());

    if JSON_MEDIA_TYPES.contains(&media_type.as_str()) && text.len() > 1 {
        return match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Request payload is not valid JSON, kept as text");
                Value::String(text)
            }
        };
    }
    if media_type == "application/x-www-form-urlencoded" {
        let fields: Map<String, Value> = url::form_urlencoded::parse(text.as_bytes())
            .into_owned()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Value::Object(fields);
    }
    Value::String(text)
}

/// Authorizer map shared by the proxy events: credentials, then
/// principal id and bearer claims.
pub(crate) fn credentials_authorizer(credentials: Option<&Credentials>) -> Map<String, Value> {
    credentials.map(Credentials::authorizer_map).unwrap_or_default()
}
