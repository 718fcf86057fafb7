//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration for the gateway emulator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Stage, region and gateway-wide behaviour.
    pub gateway: GatewaySettings,

    /// HTTP API (payload 2.0) specific settings.
    pub http_api: HttpApiConfig,

    /// Compute boundary settings.
    pub invoker: InvokerConfig,

    /// Per-function settings keyed by function name.
    pub functions: BTreeMap<String, FunctionConfig>,

    /// Named authorizers referenced by routes.
    pub authorizers: BTreeMap<String, AuthorizerConfig>,

    /// HTTP route definitions.
    pub routes: Vec<RouteConfig>,

    /// WebSocket API settings.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            tls: None,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Gateway-wide behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Deployment stage name, used as URL prefix for REST routes.
    pub stage: String,

    /// Region reported in method ARNs.
    pub region: String,

    /// Disable authorizers and API key checks.
    pub no_auth: bool,

    /// Serve REST routes without the `/{stage}` prefix.
    pub no_prepend_stage_in_url: bool,

    /// Add `Secure; HttpOnly` to every emitted cookie.
    pub enforce_secure_cookies: bool,

    /// Keys accepted on private routes. A random key is generated when empty.
    pub api_keys: Vec<String>,

    /// Stage variables exposed to events and templates.
    pub stage_variables: BTreeMap<String, String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            stage: "dev".to_string(),
            region: "us-east-1".to_string(),
            no_auth: false,
            no_prepend_stage_in_url: false,
            enforce_secure_cookies: false,
            api_keys: Vec::new(),
            stage_variables: BTreeMap::new(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpApiConfig {
    /// API-level CORS configuration. When set it replaces the default
    /// origin-echo behaviour for every response.
    pub cors: Option<HttpApiCorsConfig>,
}

/// CORS settings of an HTTP API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpApiCorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub exposed_response_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u64>,
}

impl Default for HttpApiCorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "X-Amz-Date".to_string(),
                "Authorization".to_string(),
                "X-Api-Key".to_string(),
                "X-Amz-Security-Token".to_string(),
                "X-Amz-User-Agent".to_string(),
            ],
            allowed_methods: vec![
                "OPTIONS".to_string(),
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "PATCH".to_string(),
            ],
            exposed_response_headers: Vec::new(),
            allow_credentials: false,
            max_age: None,
        }
    }
}

/// Compute boundary configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Base URL of a Lambda Invoke API compatible endpoint.
    pub endpoint: String,

    /// Default invocation timeout in seconds (0 disables it).
    pub timeout_secs: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3002".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Per-function settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FunctionConfig {
    /// Environment passed to every invocation of this function.
    pub environment: BTreeMap<String, String>,

    /// Overrides the invoker's default timeout.
    pub timeout_secs: Option<u64>,
}

/// Authorizer flavour.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizerKind {
    Token,
    Request,
    Jwt,
}

/// Named authorizer definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorizerConfig {
    #[serde(rename = "type")]
    pub kind: AuthorizerKind,

    /// Authorizer function (custom authorizers only).
    #[serde(default)]
    pub function: Option<String>,

    /// `method.request.header.X` (REST) or `$request.header.X` (HTTP API).
    #[serde(default)]
    pub identity_source: Option<String>,

    /// Regex the TOKEN identity must match.
    #[serde(default)]
    pub identity_validation_expression: Option<String>,

    /// Request authorizer payload version ("1.0" or "2.0").
    #[serde(default = "default_payload_version")]
    pub payload_version: String,

    /// Accept `{ isAuthorized, context }` results (payload 2.0).
    #[serde(default)]
    pub enable_simple_responses: bool,

    /// JWT issuer.
    #[serde(default)]
    pub issuer_url: Option<String>,

    /// JWT accepted audiences.
    #[serde(default)]
    pub audience: Vec<String>,

    /// Verify JWT signatures with this key when set.
    #[serde(default)]
    pub verify_signature: Option<JwtKeyConfig>,
}

fn default_payload_version() -> String {
    "1.0".to_string()
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            kind: AuthorizerKind::Request,
            function: None,
            identity_source: None,
            identity_validation_expression: None,
            payload_version: default_payload_version(),
            enable_simple_responses: false,
            issuer_url: None,
            audience: Vec::new(),
            verify_signature: None,
        }
    }
}

/// Key material for JWT signature verification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwtKeyConfig {
    /// JWS algorithm name, e.g. "HS256" or "RS256".
    pub algorithm: String,

    /// Shared secret for HMAC algorithms.
    #[serde(default)]
    pub secret: Option<String>,

    /// PEM encoded public key for RSA/EC algorithms.
    #[serde(default)]
    pub public_key_path: Option<String>,
}

/// API flavour a route belongs to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    /// REST API (`http` events).
    #[default]
    Rest,
    /// HTTP API (`httpApi` events).
    Http,
}

/// REST API integration style.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationStyle {
    #[default]
    LambdaProxy,
    Lambda,
}

/// Route configuration mapping a method and path to a function.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Function invoked for this route.
    pub function: String,

    /// HTTP method or "ANY". Ignored for `$default` HTTP API routes.
    #[serde(default = "default_method")]
    pub method: String,

    /// Path template, e.g. "/users/{id}" or "/{proxy+}". "$default" is
    /// accepted for HTTP API catch-all routes.
    pub path: String,

    #[serde(default)]
    pub api: ApiKind,

    /// REST integration style.
    #[serde(default)]
    pub integration: IntegrationStyle,

    /// HTTP API payload version ("1.0" or "2.0").
    #[serde(default = "default_http_payload")]
    pub payload_version: String,

    /// Name of an entry in `authorizers`, or "aws_iam".
    #[serde(default)]
    pub authorizer: Option<String>,

    /// JWT scopes required by this route.
    #[serde(default)]
    pub authorization_scopes: Vec<String>,

    /// Require an API key.
    #[serde(default)]
    pub private: bool,

    #[serde(default)]
    pub cors: Option<RouteCorsConfig>,

    #[serde(default)]
    pub operation_name: Option<String>,

    /// Request templates and schemas by content type.
    #[serde(default)]
    pub request: RequestMappingConfig,

    /// Response defaults for TEMPLATE integrations.
    #[serde(default)]
    pub response: ResponseMappingConfig,

    /// Per-pattern responses for TEMPLATE integrations, in priority order.
    #[serde(default)]
    pub responses: Vec<ResponseConfig>,
}

fn default_method() -> String {
    "ANY".to_string()
}

fn default_http_payload() -> String {
    "2.0".to_string()
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            function: String::new(),
            method: default_method(),
            path: "/".to_string(),
            api: ApiKind::default(),
            integration: IntegrationStyle::default(),
            payload_version: default_http_payload(),
            authorizer: None,
            authorization_scopes: Vec::new(),
            private: false,
            cors: None,
            operation_name: None,
            request: RequestMappingConfig::default(),
            response: ResponseMappingConfig::default(),
            responses: Vec::new(),
        }
    }
}

/// Route-level CORS settings for REST routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteCorsConfig {
    pub origins: Vec<String>,
    pub headers: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for RouteCorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            headers: vec![
                "Content-Type".to_string(),
                "X-Amz-Date".to_string(),
                "Authorization".to_string(),
                "X-Api-Key".to_string(),
                "X-Amz-Security-Token".to_string(),
            ],
            allow_credentials: false,
        }
    }
}

/// Request side mapping for TEMPLATE integrations.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RequestMappingConfig {
    /// Templates keyed by content type.
    pub templates: BTreeMap<String, String>,

    /// JSON schemas keyed by content type.
    pub schemas: BTreeMap<String, serde_json::Value>,
}

/// Response defaults for TEMPLATE integrations.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResponseMappingConfig {
    /// Static response headers; values are `'quoted'` literals.
    pub headers: BTreeMap<String, String>,

    /// Response template applied to the default response.
    pub template: Option<String>,

    /// Content type of rendered responses.
    pub content_type: Option<String>,

    /// "CONVERT_TO_BINARY" or "CONVERT_TO_TEXT".
    pub content_handling: Option<String>,
}

/// One integration response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseConfig {
    /// Response key; "default" marks the fallback response.
    pub key: String,

    #[serde(default)]
    pub selection_pattern: Option<String>,

    #[serde(default)]
    pub status_code: Option<u16>,

    /// Response templates keyed by content type.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,

    /// `method.response.header.X` -> `integration.response.body.y` or `'literal'`.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// WebSocket API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub route_selection_expression: String,
    pub idle_timeout_secs: u64,
    pub hard_timeout_secs: u64,
    pub routes: Vec<WebSocketRouteConfig>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:3001".to_string(),
            route_selection_expression: "$request.body.action".to_string(),
            idle_timeout_secs: 600,
            hard_timeout_secs: 7200,
            routes: Vec::new(),
        }
    }
}

/// WebSocket route definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketRouteConfig {
    /// `$connect`, `$disconnect`, `$default` or a custom action.
    pub route: String,

    pub function: String,

    /// Authorizer name (only honoured on `$connect`).
    #[serde(default)]
    pub authorizer: Option<String>,

    /// "$default" sends the handler's `body` back to the client.
    #[serde(default)]
    pub route_response_selection_expression: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.gateway.stage, "dev");
        assert_eq!(config.listener.max_body_size, 10 * 1024 * 1024);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_route_and_authorizer_parse() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [authorizers.jwt]
            type = "jwt"
            identity_source = "$request.header.Authorization"
            issuer_url = "https://issuer"
            audience = ["api1", "api2"]

            [[routes]]
            function = "hello"
            method = "GET"
            path = "/hello/{name}"
            api = "http"
            authorizer = "jwt"

            [[routes]]
            function = "legacy"
            path = "/legacy"
            integration = "lambda"

            [[routes.responses]]
            key = "404"
            status_code = 404
            "#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].api, ApiKind::Http);
        assert_eq!(config.routes[0].payload_version, "2.0");
        assert_eq!(config.routes[1].method, "ANY");
        assert_eq!(config.routes[1].integration, IntegrationStyle::Lambda);
        assert_eq!(config.routes[1].responses[0].status_code, Some(404));
        assert_eq!(config.authorizers["jwt"].kind, AuthorizerKind::Jwt);
        assert_eq!(config.authorizers["jwt"].audience, vec!["api1", "api2"]);
    }
}
