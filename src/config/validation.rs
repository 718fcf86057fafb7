//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing authorizers)
//! - Validate value ranges (addresses parse, payload versions known)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Unsupported-but-valid settings (AWS_IAM authorizers) pass here and are
//!   skipped with a warning when routes are built

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ApiKind, AuthorizerKind, GatewayConfig};

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD", "ANY"];

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.websocket.enabled {
        check_address(&mut errors, "websocket.bind_address", &config.websocket.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path must both be set",
            ));
        }
    }

    if config.gateway.stage.is_empty() {
        errors.push(ValidationError::new("gateway.stage", "must not be empty"));
    }

    for (name, authorizer) in &config.authorizers {
        let field = format!("authorizers.{name}");
        match authorizer.kind {
            AuthorizerKind::Token | AuthorizerKind::Request => {
                if authorizer.function.is_none() {
                    errors.push(ValidationError::new(field.clone(), "custom authorizers need a function"));
                }
            }
            AuthorizerKind::Jwt => {
                if authorizer.issuer_url.is_none() {
                    errors.push(ValidationError::new(field.clone(), "jwt authorizers need an issuer_url"));
                }
            }
        }
        if authorizer.payload_version != "1.0" && authorizer.payload_version != "2.0" {
            errors.push(ValidationError::new(field, "payload_version must be \"1.0\" or \"2.0\""));
        }
    }

    let mut seen = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{i}]");
        let method = route.method.to_uppercase();

        if !METHODS.contains(&method.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.method"),
                format!("unsupported method {:?}", route.method),
            ));
        }

        let is_default_route = route.path == "$default";
        if is_default_route && route.api != ApiKind::Http {
            errors.push(ValidationError::new(
                format!("{field}.path"),
                "$default is only valid for HTTP API routes",
            ));
        } else if !is_default_route && !route.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path"), "must start with '/'"));
        }

        if route.payload_version != "1.0" && route.payload_version != "2.0" {
            errors.push(ValidationError::new(
                format!("{field}.payload_version"),
                "must be \"1.0\" or \"2.0\"",
            ));
        }

        if let Some(name) = &route.authorizer {
            if !name.eq_ignore_ascii_case("aws_iam") && !config.authorizers.contains_key(name) {
                errors.push(ValidationError::new(
                    format!("{field}.authorizer"),
                    format!("unknown authorizer {name:?}"),
                ));
            }
        }

        for response in &route.responses {
            if let Some(pattern) = &response.selection_pattern {
                if regex::Regex::new(pattern).is_err() {
                    errors.push(ValidationError::new(
                        format!("{field}.responses.{}", response.key),
                        format!("invalid selection_pattern {pattern:?}"),
                    ));
                }
            }
        }

        let key = (route.api, method, route.path.trim_end_matches('/').to_string());
        if !seen.insert(key) {
            errors.push(ValidationError::new(
                field,
                format!("duplicate route {} {}", route.method, route.path),
            ));
        }
    }

    for (i, route) in config.websocket.routes.iter().enumerate() {
        if let Some(name) = &route.authorizer {
            if !config.authorizers.contains_key(name) {
                errors.push(ValidationError::new(
                    format!("websocket.routes[{i}].authorizer"),
                    format!("unknown authorizer {name:?}"),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address {value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthorizerConfig, RouteConfig};

    fn route(method: &str, path: &str) -> RouteConfig {
        toml::from_str(&format!(
            "function = \"f\"\nmethod = \"{method}\"\npath = \"{path}\""
        ))
        .unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_duplicate_routes_detected() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("GET", "/a"));
        config.routes.push(route("get", "/a/"));
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate"));
    }

    #[test]
    fn test_unknown_authorizer_and_method() {
        let mut config = GatewayConfig::default();
        let mut r = route("FETCH", "/a");
        r.authorizer = Some("missing".into());
        config.routes.push(r);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_aws_iam_passes_validation() {
        let mut config = GatewayConfig::default();
        let mut r = route("GET", "/a");
        r.authorizer = Some("aws_iam".into());
        config.routes.push(r);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_custom_authorizer_requires_function() {
        let mut config = GatewayConfig::default();
        let authorizer: AuthorizerConfig = toml::from_str("type = \"token\"").unwrap();
        config.authorizers.insert("auth".into(), authorizer);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "authorizers.auth");
    }
}
