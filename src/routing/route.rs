//! Compiled route definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::matcher::{PathTemplate, RouteMethod};
use crate::auth::{AuthorizerDescriptor, AuthorizerSetupError};
use crate::config::{
    ApiKind, AuthorizerConfig, GatewaySettings, IntegrationStyle, RouteConfig, RouteCorsConfig,
};
use crate::events::overrides::Stage;

/// How a route turns requests into events and results into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationKind {
    /// Mapping templates (REST `lambda` integration).
    Template,
    /// Proxy event, payload format 1.0.
    ProxyV1,
    /// Proxy event, payload format 2.0.
    ProxyV2,
}

impl IntegrationKind {
    pub fn is_proxy(self) -> bool {
        !matches!(self, Self::Template)
    }
}

/// Binary conversion applied to template responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentHandling {
    #[default]
    Passthrough,
    ConvertToBinary,
    ConvertToText,
}

impl ContentHandling {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("CONVERT_TO_BINARY") => Self::ConvertToBinary,
            Some("CONVERT_TO_TEXT") => Self::ConvertToText,
            _ => Self::Passthrough,
        }
    }
}

/// Path a route is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePath {
    Template(PathTemplate),
    /// HTTP API `$default` catch-all.
    Default,
}

/// Compiled request schema.
#[derive(Clone)]
pub struct SchemaValidator(Arc<jsonschema::Validator>);

impl SchemaValidator {
    /// Error messages for `instance`, empty when valid.
    pub fn errors(&self, instance: &Value) -> Vec<String> {
        self.0.iter_errors(instance).map(|e| e.to_string()).collect()
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SchemaValidator")
    }
}

/// One integration response of a template route.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub key: String,
    /// Selection pattern anchored to the whole error message.
    pub selection: Option<Regex>,
    pub status_code: Option<u16>,
    pub templates: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
}

impl ResponseDescriptor {
    pub fn is_default(&self) -> bool {
        self.key == "default"
    }
}

/// Route registration failure.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid method '{0}'")]
    Method(String),

    #[error("{0}")]
    Path(String),

    #[error("unknown authorizer '{0}'")]
    UnknownAuthorizer(String),

    #[error(transparent)]
    Authorizer(#[from] AuthorizerSetupError),

    #[error("invalid selection pattern '{pattern}': {error}")]
    Selection { pattern: String, error: regex::Error },

    #[error("invalid request schema for {content_type}: {message}")]
    Schema { content_type: String, message: String },
}

/// Immutable route, built once at startup.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub function: String,
    pub method: RouteMethod,
    pub path: RoutePath,
    pub api: ApiKind,
    pub integration: IntegrationKind,
    /// `GET /users/{id}` or `$default`.
    pub route_key: String,
    pub authorizer: AuthorizerDescriptor,
    pub cors: Option<RouteCorsConfig>,
    pub private: bool,
    pub request_templates: BTreeMap<String, String>,
    pub request_schemas: BTreeMap<String, SchemaValidator>,
    pub responses: Vec<ResponseDescriptor>,
    /// Static response headers, values are `'quoted'` literals.
    pub response_headers: BTreeMap<String, String>,
    pub response_content_type: String,
    pub content_handling: ContentHandling,
    pub operation_name: Option<String>,
}

impl RouteDefinition {
    pub fn from_config(
        config: &RouteConfig,
        authorizers: &BTreeMap<String, AuthorizerConfig>,
        settings: &GatewaySettings,
    ) -> Result<Self, RouteError> {
        let is_default = config.api == ApiKind::Http && config.path.trim() == "$default";
        let (method, path) = if is_default {
            (RouteMethod::Any, RoutePath::Default)
        } else {
            let method = RouteMethod::parse(&config.method).ok_or_else(|| RouteError::Method(config.method.clone()))?;
            (method, RoutePath::Template(PathTemplate::parse(&config.path).map_err(RouteError::Path)?))
        };

        let route_key = match &path {
            RoutePath::Default => "$default".to_string(),
            RoutePath::Template(template) => format!("{} {}", method.as_str(), template.as_str()),
        };

        let integration = match (config.api, config.integration) {
            (ApiKind::Rest, IntegrationStyle::Lambda) => IntegrationKind::Template,
            (ApiKind::Rest, IntegrationStyle::LambdaProxy) => IntegrationKind::ProxyV1,
            (ApiKind::Http, _) if config.payload_version == "1.0" => IntegrationKind::ProxyV1,
            (ApiKind::Http, _) => IntegrationKind::ProxyV2,
        };

        let authorizer = Self::authorizer(config, authorizers, settings)?;

        let mut request_templates = config.request.templates.clone();
        if integration == IntegrationKind::Template && request_templates.is_empty() {
            request_templates.insert(
                "application/json".to_string(),
                crate::events::template::DEFAULT_REQUEST_TEMPLATE.to_string(),
            );
        }

        let request_schemas = config
            .request
            .schemas
            .iter()
            .map(|(content_type, schema)| {
                jsonschema::validator_for(schema)
                    .map(|v| (content_type.clone(), SchemaValidator(Arc::new(v))))
                    .map_err(|e| RouteError::Schema {
                        content_type: content_type.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let response_content_type = config
            .response
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());

        Ok(Self {
            function: config.function.clone(),
            method,
            path,
            api: config.api,
            integration,
            route_key,
            authorizer,
            cors: config.cors.clone(),
            private: config.private,
            request_templates,
            request_schemas,
            responses: Self::responses(config, &response_content_type)?,
            response_headers: config.response.headers.clone(),
            response_content_type,
            content_handling: ContentHandling::parse(config.response.content_handling.as_deref()),
            operation_name: config.operation_name.clone(),
        })
    }

    fn authorizer(
        config: &RouteConfig,
        authorizers: &BTreeMap<String, AuthorizerConfig>,
        settings: &GatewaySettings,
    ) -> Result<AuthorizerDescriptor, RouteError> {
        let Some(name) = config.authorizer.as_deref() else {
            return Ok(AuthorizerDescriptor::None);
        };
        if settings.no_auth {
            return Ok(AuthorizerDescriptor::None);
        }
        if name.eq_ignore_ascii_case("aws_iam") || name.starts_with("arn:") {
            tracing::warn!(
                authorizer = %name,
                path = %config.path,
                "Authorizer type is not supported offline, route registered without authorizer"
            );
            return Ok(AuthorizerDescriptor::None);
        }
        let authorizer = authorizers
            .get(name)
            .ok_or_else(|| RouteError::UnknownAuthorizer(name.to_string()))?;
        Ok(AuthorizerDescriptor::from_config(
            name,
            authorizer,
            config.api,
            &config.authorization_scopes,
        )?)
    }

    fn responses(config: &RouteConfig, content_type: &str) -> Result<Vec<ResponseDescriptor>, RouteError> {
        let mut responses = config
            .responses
            .iter()
            .map(|response| {
                let selection = response
                    .selection_pattern
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(&format!("^(?s:{pattern})$")).map_err(|error| RouteError::Selection {
                            pattern: pattern.to_string(),
                            error,
                        })
                    })
                    .transpose()?;
                Ok(ResponseDescriptor {
                    key: response.key.clone(),
                    selection,
                    status_code: response.status_code,
                    templates: response.templates.clone(),
                    parameters: response.parameters.clone(),
                })
            })
            .collect::<Result<Vec<_>, RouteError>>()?;

        if !responses.iter().any(ResponseDescriptor::is_default) {
            responses.push(ResponseDescriptor {
                key: "default".to_string(),
                selection: None,
                status_code: None,
                templates: BTreeMap::new(),
                parameters: BTreeMap::new(),
            });
        }
        if let Some(template) = &config.response.template {
            for response in responses.iter_mut().filter(|r| r.is_default()) {
                response
                    .templates
                    .entry(content_type.to_string())
                    .or_insert_with(|| template.clone());
            }
        }
        Ok(responses)
    }

    /// Route template text (`/users/{id}`) or `$default`.
    pub fn resource_path(&self) -> &str {
        match &self.path {
            RoutePath::Template(template) => template.as_str(),
            RoutePath::Default => "$default",
        }
    }

    /// `resource` reported in 1.0 events.
    pub fn event_resource(&self) -> &str {
        match self.api {
            ApiKind::Http => &self.route_key,
            ApiKind::Rest => self.resource_path(),
        }
    }

    /// Stage name events carry; HTTP APIs always report `$default`.
    pub fn event_stage<'a>(&self, stage: &'a Stage) -> &'a str {
        match self.api {
            ApiKind::Http => "$default",
            ApiKind::Rest => &stage.name,
        }
    }

    /// The `default` integration response.
    pub fn default_response(&self) -> Option<&ResponseDescriptor> {
        self.responses.iter().find(|r| r.is_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizerKind, ResponseConfig};

    fn build(config: RouteConfig) -> Result<RouteDefinition, RouteError> {
        RouteDefinition::from_config(&config, &BTreeMap::new(), &GatewaySettings::default())
    }

    #[test]
    fn test_integration_kinds() {
        let rest_proxy = build(RouteConfig {
            path: "/a".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(rest_proxy.integration, IntegrationKind::ProxyV1);
        assert_eq!(rest_proxy.route_key, "ANY /a");

        let template = build(RouteConfig {
            path: "/a".into(),
            integration: IntegrationStyle::Lambda,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(template.integration, IntegrationKind::Template);
        assert!(template.request_templates.contains_key("application/json"));

        let http_v1 = build(RouteConfig {
            path: "/a".into(),
            method: "get".into(),
            api: ApiKind::Http,
            payload_version: "1.0".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(http_v1.integration, IntegrationKind::ProxyV1);
        assert_eq!(http_v1.event_resource(), "GET /a");

        let http_default = build(RouteConfig {
            path: "$default".into(),
            api: ApiKind::Http,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(http_default.integration, IntegrationKind::ProxyV2);
        assert_eq!(http_default.path, RoutePath::Default);
        assert_eq!(http_default.route_key, "$default");
    }

    #[test]
    fn test_unsupported_authorizers_are_dropped() {
        let route = build(RouteConfig {
            path: "/a".into(),
            authorizer: Some("AWS_IAM".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(route.authorizer.is_none());

        assert!(matches!(
            build(RouteConfig {
                path: "/a".into(),
                authorizer: Some("missing".into()),
                ..Default::default()
            }),
            Err(RouteError::UnknownAuthorizer(_))
        ));
    }

    #[test]
    fn test_invalid_token_source_rejects_route() {
        let mut authorizers = BTreeMap::new();
        authorizers.insert(
            "tok".to_string(),
            AuthorizerConfig {
                kind: AuthorizerKind::Token,
                function: Some("auth".into()),
                identity_source: Some("method.request.querystring.token".into()),
                ..Default::default()
            },
        );
        let config = RouteConfig {
            path: "/a".into(),
            authorizer: Some("tok".into()),
            ..Default::default()
        };
        let result = RouteDefinition::from_config(&config, &authorizers, &GatewaySettings::default());
        assert!(matches!(result, Err(RouteError::Authorizer(_))));

        let no_auth = GatewaySettings {
            no_auth: true,
            ..Default::default()
        };
        let route = RouteDefinition::from_config(&config, &authorizers, &no_auth).unwrap();
        assert!(route.authorizer.is_none());
    }

    #[test]
    fn test_responses_and_default_template() {
        let route = build(RouteConfig {
            path: "/a".into(),
            integration: IntegrationStyle::Lambda,
            responses: vec![ResponseConfig {
                key: "404".into(),
                selection_pattern: Some(".*Not Found.*".into()),
                status_code: Some(404),
                templates: BTreeMap::new(),
                parameters: BTreeMap::new(),
            }],
            response: crate::config::ResponseMappingConfig {
                template: Some("$input.path('$')".into()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        assert_eq!(route.responses.len(), 2);
        let selection = route.responses[0].selection.as_ref().unwrap();
        assert!(selection.is_match("[404] Not Found"));
        assert!(!selection.is_match("[500] Oops"));
        let default = route.default_response().unwrap();
        assert_eq!(default.templates["application/json"], "$input.path('$')");
    }

    #[test]
    fn test_invalid_schema_and_pattern() {
        let mut config = RouteConfig {
            path: "/a".into(),
            ..Default::default()
        };
        config
            .request
            .schemas
            .insert("application/json".into(), serde_json::json!({"type": 12}));
        assert!(matches!(build(config), Err(RouteError::Schema { .. })));

        let config = RouteConfig {
            path: "/a".into(),
            responses: vec![ResponseConfig {
                key: "400".into(),
                selection_pattern: Some("(".into()),
                status_code: None,
                templates: BTreeMap::new(),
                parameters: BTreeMap::new(),
            }],
            ..Default::default()
        };
        assert!(matches!(build(config), Err(RouteError::Selection { .. })));
    }
}
