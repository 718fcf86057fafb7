//! Route authorization.
//!
//! # Data Flow
//! ```text
//! AuthorizerConfig + route scopes (at startup)
//!     → AuthorizerDescriptor::from_config
//!     → stored on the RouteDefinition
//!
//! Request (per call)
//!     → custom.rs (invoke authorizer function, evaluate policy)
//!     → jwt.rs (decode bearer token, check exp/iss/aud/scopes)
//!     → AuthorizerOutcome::{Allow, Deny, Error}
//! ```
//!
//! # Design Decisions
//! - Descriptors are validated once; a malformed identity source rejects the
//!   route rather than failing every request
//! - Outcomes are values, turned into HTTP replies by the server
//! - Successful credentials are plain data so they can be cached per
//!   WebSocket connection

pub mod custom;
pub mod jwt;
pub mod policy;

use std::sync::Arc;

use axum::http::StatusCode;
use jsonwebtoken::{Algorithm, DecodingKey};
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{ApiKind, AuthorizerConfig, AuthorizerKind, JwtKeyConfig};

pub use policy::can_execute;

/// Identity produced by a successful authorizer run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub principal_id: Option<String>,
    /// Authorizer context, values normalized to strings.
    pub context: Map<String, Value>,
    pub usage_identifier_key: Option<String>,
    pub claims: Option<Value>,
    pub scopes: Option<Vec<String>>,
}

impl Credentials {
    /// Credentials from a custom authorizer response.
    pub fn from_custom(principal_id: Option<String>, context: Map<String, Value>) -> Self {
        Self {
            principal_id,
            context,
            ..Default::default()
        }
    }

    /// Credentials from a validated JWT.
    pub fn from_jwt(claims: Value, scopes: Option<Vec<String>>) -> Self {
        Self {
            claims: Some(claims),
            scopes,
            ..Default::default()
        }
    }

    /// Map exposed as `requestContext.authorizer` / `$context.authorizer`.
    ///
    /// JWT credentials carry their claims separately and get no
    /// `integrationLatency`.
    pub fn authorizer_map(&self) -> Map<String, Value> {
        let mut authorizer = Map::new();
        if self.claims.is_none() {
            authorizer.insert("integrationLatency".into(), Value::String("42".into()));
        }
        if let Some(principal_id) = &self.principal_id {
            authorizer.insert("principalId".into(), Value::String(principal_id.clone()));
        }
        authorizer.extend(self.context.clone());
        authorizer
    }
}

/// A refused request.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }
}

/// Result of one authorizer pass.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizerOutcome {
    Allow(Credentials),
    Deny(Rejection),
    /// The authorizer answered with something the gateway cannot use.
    Error(String),
}

impl AuthorizerOutcome {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow(_) => "allow",
            Self::Deny(_) => "deny",
            Self::Error(_) => "error",
        }
    }
}

/// Custom authorizer flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomKind {
    Token,
    Request,
}

/// Event payload version sent to a REQUEST authorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadVersion {
    V1,
    V2,
}

impl PayloadVersion {
    pub fn parse(value: &str) -> Self {
        if value == "2.0" {
            Self::V2
        } else {
            Self::V1
        }
    }
}

/// Authorizer backed by a function.
#[derive(Debug, Clone)]
pub struct CustomAuthorizer {
    pub name: String,
    pub kind: CustomKind,
    pub function: String,
    /// Lower-cased header carrying the token (TOKEN authorizers).
    pub identity_header: Option<String>,
    /// Raw identity source expressions, reported to v2 REQUEST authorizers.
    pub identity_sources: Vec<String>,
    pub identity_validation: Option<Regex>,
    pub payload_version: PayloadVersion,
    pub enable_simple_responses: bool,
}

/// Key material for JWT signature checks.
#[derive(Clone)]
pub struct JwtVerification {
    pub algorithm: Algorithm,
    pub key: Arc<DecodingKey>,
}

impl std::fmt::Debug for JwtVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerification")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Built-in JWT authorizer.
#[derive(Debug, Clone)]
pub struct JwtAuthorizer {
    pub name: String,
    pub issuer_url: String,
    pub audience: Vec<String>,
    pub scopes: Vec<String>,
    pub identity_header: String,
    pub verification: Option<JwtVerification>,
}

/// Authorization attached to a route.
#[derive(Debug, Clone, Default)]
pub enum AuthorizerDescriptor {
    #[default]
    None,
    Custom(CustomAuthorizer),
    Jwt(JwtAuthorizer),
}

/// Authorizer configuration that cannot be registered.
#[derive(Debug, Error)]
pub enum AuthorizerSetupError {
    #[error("authorizer {name}: identity source '{source_expr}' must be method.request.header.<Name>")]
    IdentitySource { name: String, source_expr: String },

    #[error("authorizer {name}: invalid identity validation expression: {error}")]
    ValidationExpression { name: String, error: regex::Error },

    #[error("authorizer {name}: missing {field}")]
    Missing { name: String, field: &'static str },

    #[error("authorizer {name}: signature key: {message}")]
    Key { name: String, message: String },
}

fn header_from_source(source: &str, api: ApiKind) -> Option<String> {
    let name = match api {
        ApiKind::Rest => source.strip_prefix("method.request.header."),
        ApiKind::Http => source
            .strip_prefix("$request.header.")
            .or_else(|| source.strip_prefix("method.request.header.")),
    }?;
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| name.to_ascii_lowercase())
}

impl AuthorizerDescriptor {
    /// Build the descriptor for one route.
    pub fn from_config(
        name: &str,
        config: &AuthorizerConfig,
        api: ApiKind,
        scopes: &[String],
    ) -> Result<Self, AuthorizerSetupError> {
        match config.kind {
            AuthorizerKind::Token | AuthorizerKind::Request => {
                let function = config.function.clone().ok_or_else(|| AuthorizerSetupError::Missing {
                    name: name.to_string(),
                    field: "function",
                })?;
                let kind = if config.kind == AuthorizerKind::Token {
                    CustomKind::Token
                } else {
                    CustomKind::Request
                };

                let identity_sources: Vec<String> = config
                    .identity_source
                    .as_deref()
                    .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                    .unwrap_or_default();

                let identity_header = match kind {
                    CustomKind::Token => {
                        let source = config
                            .identity_source
                            .clone()
                            .unwrap_or_else(|| "method.request.header.Authorization".into());
                        Some(header_from_source(source.trim(), api).ok_or_else(|| {
                            AuthorizerSetupError::IdentitySource {
                                name: name.to_string(),
                                source_expr: source.clone(),
                            }
                        })?)
                    }
                    CustomKind::Request => None,
                };

                let identity_validation = config
                    .identity_validation_expression
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|error| AuthorizerSetupError::ValidationExpression {
                        name: name.to_string(),
                        error,
                    })?;

                Ok(Self::Custom(CustomAuthorizer {
                    name: name.to_string(),
                    kind,
                    function,
                    identity_header,
                    identity_sources,
                    identity_validation,
                    payload_version: PayloadVersion::parse(&config.payload_version),
                    enable_simple_responses: config.enable_simple_responses,
                }))
            }
            AuthorizerKind::Jwt => {
                let issuer_url = config.issuer_url.clone().ok_or_else(|| AuthorizerSetupError::Missing {
                    name: name.to_string(),
                    field: "issuer_url",
                })?;
                let source = config
                    .identity_source
                    .clone()
                    .unwrap_or_else(|| "$request.header.Authorization".into());
                let identity_header = header_from_source(source.trim(), ApiKind::Http).ok_or_else(|| {
                    AuthorizerSetupError::IdentitySource {
                        name: name.to_string(),
                        source_expr: source.clone(),
                    }
                })?;
                let verification = config
                    .verify_signature
                    .as_ref()
                    .map(|key| load_verification(name, key))
                    .transpose()?;

                Ok(Self::Jwt(JwtAuthorizer {
                    name: name.to_string(),
                    issuer_url,
                    audience: config.audience.clone(),
                    scopes: scopes.to_vec(),
                    identity_header,
                    verification,
                }))
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Custom(c) => Some(&c.name),
            Self::Jwt(j) => Some(&j.name),
        }
    }
}

fn load_verification(name: &str, config: &JwtKeyConfig) -> Result<JwtVerification, AuthorizerSetupError> {
    let key_error = |message: String| AuthorizerSetupError::Key {
        name: name.to_string(),
        message,
    };
    let algorithm: Algorithm = config
        .algorithm
        .parse()
        .map_err(|e: jsonwebtoken::errors::Error| key_error(e.to_string()))?;

    let key = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = config.secret.as_deref().ok_or_else(|| key_error("secret is required".into()))?;
            DecodingKey::from_secret(secret.as_bytes())
        }
        _ => {
            let path = config
                .public_key_path
                .as_deref()
                .ok_or_else(|| key_error("public_key_path is required".into()))?;
            let pem = std::fs::read(path).map_err(|e| key_error(format!("{path}: {e}")))?;
            let parsed = match algorithm {
                Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
                Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
                _ => DecodingKey::from_rsa_pem(&pem),
            };
            parsed.map_err(|e| key_error(e.to_string()))?
        }
    };

    Ok(JwtVerification {
        algorithm,
        key: Arc::new(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(kind: AuthorizerKind, source: Option<&str>) -> AuthorizerConfig {
        AuthorizerConfig {
            kind,
            function: Some("auth".into()),
            identity_source: source.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_token_identity_source() {
        let descriptor = AuthorizerDescriptor::from_config(
            "a",
            &custom(AuthorizerKind::Token, Some("method.request.header.X-Auth-Token")),
            ApiKind::Rest,
            &[],
        )
        .unwrap();
        match descriptor {
            AuthorizerDescriptor::Custom(c) => {
                assert_eq!(c.kind, CustomKind::Token);
                assert_eq!(c.identity_header.as_deref(), Some("x-auth-token"));
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }
    }

    #[test]
    fn test_token_default_source_is_authorization() {
        let descriptor =
            AuthorizerDescriptor::from_config("a", &custom(AuthorizerKind::Token, None), ApiKind::Rest, &[]).unwrap();
        let AuthorizerDescriptor::Custom(c) = descriptor else {
            panic!("expected custom authorizer");
        };
        assert_eq!(c.identity_header.as_deref(), Some("authorization"));
    }

    #[test]
    fn test_token_rejects_other_sources() {
        for source in ["method.request.querystring.token", "header.Authorization", "method.request.header."] {
            let result = AuthorizerDescriptor::from_config(
                "a",
                &custom(AuthorizerKind::Token, Some(source)),
                ApiKind::Rest,
                &[],
            );
            assert!(matches!(result, Err(AuthorizerSetupError::IdentitySource { .. })), "{source}");
        }
    }

    #[test]
    fn test_request_keeps_sources() {
        let descriptor = AuthorizerDescriptor::from_config(
            "a",
            &custom(AuthorizerKind::Request, Some("$request.header.X, $request.querystring.q")),
            ApiKind::Http,
            &[],
        )
        .unwrap();
        let AuthorizerDescriptor::Custom(c) = descriptor else {
            panic!("expected custom authorizer");
        };
        assert_eq!(c.identity_sources, vec!["$request.header.X", "$request.querystring.q"]);
        assert!(c.identity_header.is_none());
    }

    #[test]
    fn test_jwt_descriptor() {
        let config = AuthorizerConfig {
            kind: AuthorizerKind::Jwt,
            issuer_url: Some("https://issuer".into()),
            audience: vec!["api1".into()],
            ..Default::default()
        };
        let descriptor =
            AuthorizerDescriptor::from_config("jwt", &config, ApiKind::Http, &["read".to_string()]).unwrap();
        let AuthorizerDescriptor::Jwt(j) = descriptor else {
            panic!("expected jwt authorizer");
        };
        assert_eq!(j.identity_header, "authorization");
        assert_eq!(j.scopes, vec!["read"]);
        assert!(j.verification.is_none());
    }

    #[test]
    fn test_custom_credentials_authorizer_map() {
        let mut context = Map::new();
        context.insert("role".into(), Value::String("admin".into()));
        let credentials = Credentials::from_custom(Some("user".into()), context);
        let map = credentials.authorizer_map();
        assert_eq!(map["integrationLatency"], "42");
        assert_eq!(map["principalId"], "user");
        assert_eq!(map["role"], "admin");
    }

    #[test]
    fn test_authorizer_map_follows_context_changes() {
        let mut credentials = Credentials::from_custom(Some("user".into()), Map::new());
        credentials.context.insert("tier".into(), Value::String("gold".into()));
        assert_eq!(credentials.authorizer_map()["tier"], "gold");

        let jwt = Credentials::from_jwt(serde_json::json!({"sub": "u"}), None);
        assert!(jwt.authorizer_map().is_empty());
    }
}
