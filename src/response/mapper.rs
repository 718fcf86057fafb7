//! Function results to HTTP responses.
//!
//! # Responsibilities
//! - Derive the status code of failed invocations (`[ddd]` prefix)
//! - Template routes: select the integration response, apply response
//!   parameters, static headers and the response template
//! - Proxy routes: read `statusCode`, headers, cookies and body from the
//!   result, rejecting bodies that are not strings
//!
//! # Design Decisions
//! - Mapping is pure: all inputs are passed in, nothing is cached
//! - Contract violations are `MappingError`s, reported as 502 by the caller
//!   and kept apart from function errors

use std::sync::LazyLock;

use axum::body::Bytes;
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::envelope::{ResponseBody, ResponseEnvelope};
use crate::events::overrides::Stage;
use crate::events::snapshot::RequestSnapshot;
use crate::invoke::InvocationError;
use crate::mapping::{json_path, MappingContextBuilder};
use crate::routing::{ContentHandling, IntegrationKind, ResponseDescriptor, RouteMatch};
use crate::template::{render_template_object, stringify};

static STATUS_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\[(\d{3})\]").unwrap()
});

const BODY_NOT_STRINGIFIED: &str = "According to the API Gateway specs, the body content must be stringified. \
Check your Lambda response and make sure you are invoking JSON.stringify(YOUR_CONTENT) on your body object";

/// A function result the gateway cannot turn into a response.
#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("{BODY_NOT_STRINGIFIED}")]
    BodyNotStringified,

    #[error("invalid statusCode {0}")]
    InvalidStatus(String),

    #[error("body is not valid base64: {0}")]
    Base64(String),
}

impl MappingError {
    /// 502 reply describing this error.
    pub fn to_envelope(&self) -> ResponseEnvelope {
        ResponseEnvelope::gateway_error(StatusCode::BAD_GATEWAY, &self.to_string(), "MappingError", &[])
    }
}

/// Request-side data response templates are rendered against.
#[derive(Debug, Clone, Copy)]
pub struct MappingInput<'a> {
    pub request: &'a RequestSnapshot,
    pub route: &'a RouteMatch,
    pub stage: &'a Stage,
}

/// Status code carried by an error message (`[404] Not found`), or the
/// integration default.
pub fn error_status(message: &str, integration: IntegrationKind) -> StatusCode {
    STATUS_PREFIX
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(match integration {
            IntegrationKind::Template => StatusCode::INTERNAL_SERVER_ERROR,
            IntegrationKind::ProxyV1 | IntegrationKind::ProxyV2 => StatusCode::BAD_GATEWAY,
        })
}

/// Map an invocation outcome to a response envelope.
pub fn map_response(
    input: &MappingInput<'_>,
    outcome: Result<Value, InvocationError>,
) -> Result<ResponseEnvelope, MappingError> {
    match input.route.route.integration {
        IntegrationKind::Template => Ok(map_template(input, outcome)),
        kind => map_proxy(kind, outcome),
    }
}

/// First non-default response whose selection pattern (or key) matches the
/// error message.
pub fn select_response<'r>(responses: &'r [ResponseDescriptor], message: &str) -> Option<&'r ResponseDescriptor> {
    responses.iter().filter(|r| !r.is_default()).find(|r| match &r.selection {
        Some(pattern) => pattern.is_match(message),
        None => Regex::new(&r.key)
            .map(|re| re.is_match(message))
            .unwrap_or_else(|_| message.contains(&r.key)),
    })
}

fn map_template(input: &MappingInput<'_>, outcome: Result<Value, InvocationError>) -> ResponseEnvelope {
    let route = &input.route.route;

    let (mut result, chosen, status) = match outcome {
        Ok(result) => {
            let chosen = route.default_response();
            let status = chosen
                .and_then(|r| r.status_code)
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
            (result, chosen, status)
        }
        Err(error) => {
            tracing::error!(function = %route.function, error = %error.message, "Function returned an error");
            let selected = select_response(&route.responses, &error.message);
            let status = selected
                .and_then(|r| r.status_code)
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or_else(|| error_status(&error.message, IntegrationKind::Template));
            (error.to_payload(), selected.or_else(|| route.default_response()), status)
        }
    };

    tracing::debug!(response = chosen.map(|r| r.key.as_str()).unwrap_or("default"), "Using integration response");
    let mut envelope = ResponseEnvelope::new(status);

    if let Some(response) = chosen {
        apply_response_parameters(&mut envelope, &response.parameters, &result);
    }
    for (name, value) in &route.response_headers {
        match strip_quotes(value) {
            Some(literal) => envelope.set_header(name, literal),
            None => tracing::debug!(header = %name, "Ignoring unquoted static response header"),
        }
    }

    if let Some(template) = chosen.and_then(|r| r.templates.get(&route.response_content_type)) {
        if template.trim() != "" {
            let context = MappingContextBuilder::new(input.request, input.stage)
                .route(input.route)
                .payload(result.clone())
                .build();
            let mut root = Map::new();
            root.insert("root".into(), Value::String(template.clone()));
            match render_template_object(&Value::Object(root), &context) {
                Ok(rendered) => result = rendered.get("root").cloned().unwrap_or(Value::Null),
                Err(e) => tracing::error!(
                    function = %route.function,
                    content_type = %route.response_content_type,
                    error = %e,
                    "Response template failed, result kept"
                ),
            }
        }
    }

    envelope.set_header_if_absent("Content-Type", route.response_content_type.clone());

    envelope.body = match (route.content_handling, result) {
        (ContentHandling::ConvertToBinary, value) => {
            let encoded = stringify(&value);
            match STANDARD.decode(encoded.trim()) {
                Ok(bytes) => ResponseBody::Binary(Bytes::from(bytes)),
                Err(e) => {
                    tracing::warn!(error = %e, "Result is not base64, sent as text");
                    ResponseBody::Text(encoded)
                }
            }
        }
        (ContentHandling::ConvertToText, Value::String(text)) => ResponseBody::Text(text),
        (_, Value::Null) => ResponseBody::Empty,
        (_, value) => ResponseBody::Text(value.to_string()),
    };
    envelope
}

fn apply_response_parameters(envelope: &mut ResponseEnvelope, parameters: &std::collections::BTreeMap<String, String>, result: &Value) {
    for (key, value) in parameters {
        let Some(header) = key.strip_prefix("method.response.header.").filter(|h| !h.is_empty()) else {
            tracing::warn!(
                parameter = %key,
                "Only method.response.header.NAME response parameters are supported, skipping"
            );
            continue;
        };

        let header_value = if let Some(source) = value.strip_prefix("integration.response.") {
            match source.strip_prefix("body") {
                Some("") => stringify_header(Some(result.clone())),
                Some(path) if path.starts_with('.') => stringify_header(json_path::query(result, &path[1..])),
                _ => {
                    tracing::warn!(
                        parameter = %key,
                        value = %value,
                        "Only integration.response.body[.JSON_path] response parameter values are supported, skipping"
                    );
                    continue;
                }
            }
        } else {
            strip_quotes(value).unwrap_or(value).to_string()
        };

        if header_value.is_empty() {
            tracing::warn!(parameter = %key, value = %value, "Empty value for response parameter, not set");
            continue;
        }
        envelope.set_header(header, header_value);
    }
}

fn stringify_header(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(value) => stringify(&value),
    }
}

fn strip_quotes(value: &str) -> Option<&str> {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
}

fn map_proxy(kind: IntegrationKind, outcome: Result<Value, InvocationError>) -> Result<ResponseEnvelope, MappingError> {
    let mut result = match outcome {
        Ok(result) => result,
        Err(error) => {
            let status = error_status(&error.message, kind);
            return Ok(ResponseEnvelope::json(status, &error.to_payload()));
        }
    };

    if kind == IntegrationKind::ProxyV2 && !result.get("statusCode").is_some_and(|s| !s.is_null()) {
        let body = match &result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        result = json!({
            "body": body,
            "headers": { "Content-Type": "application/json" },
            "isBase64Encoded": false,
            "statusCode": 200,
        });
    }

    let status = match &result {
        Value::Null => StatusCode::BAD_GATEWAY,
        Value::Object(map) if map.contains_key("errorType") => StatusCode::BAD_GATEWAY,
        other => parse_status(other.get("statusCode"))?,
    };
    let mut envelope = ResponseEnvelope::new(status);

    for section in ["headers", "multiValueHeaders"] {
        let Some(headers) = result.get(section).and_then(Value::as_object) else {
            continue;
        };
        for (name, value) in headers {
            let values: Vec<String> = match value {
                Value::Array(items) => items.iter().map(stringify).collect(),
                Value::Null => Vec::new(),
                other => vec![stringify(other)],
            };
            for value in values {
                if name.eq_ignore_ascii_case("set-cookie") {
                    envelope.add_cookie(&value);
                } else {
                    envelope.append_header(name.clone(), value);
                }
            }
        }
    }

    if kind == IntegrationKind::ProxyV2 {
        if let Some(cookies) = result.get("cookies").and_then(Value::as_array) {
            for cookie in cookies {
                envelope.add_cookie(&stringify(cookie));
            }
        }
    }

    envelope.set_header_if_absent("Content-Type", "application/json");

    envelope.body = match &result {
        Value::String(text) => ResponseBody::Text(Value::String(text.clone()).to_string()),
        Value::Object(map) => match map.get("body") {
            None | Some(Value::Null) => ResponseBody::Empty,
            Some(Value::String(body)) if truthy(map.get("isBase64Encoded")) => {
                let bytes = STANDARD
                    .decode(body.trim())
                    .map_err(|e| MappingError::Base64(e.to_string()))?;
                ResponseBody::Binary(Bytes::from(bytes))
            }
            Some(Value::String(body)) => ResponseBody::Text(body.clone()),
            Some(_) => return Err(MappingError::BodyNotStringified),
        },
        _ => ResponseBody::Empty,
    };
    Ok(envelope)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn parse_status(value: Option<&Value>) -> Result<StatusCode, MappingError> {
    let code = match value {
        None | Some(Value::Null) => return Ok(StatusCode::OK),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    code.and_then(|c| u16::try_from(c).ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| MappingError::InvalidStatus(value.map(stringify).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKind, GatewaySettings, IntegrationStyle, ResponseConfig, RouteConfig};
    use crate::events::overrides::EnvironmentOverrides;
    use crate::events::snapshot::tests::snapshot;
    use crate::routing::tests::route_match_with;
    use axum::http::Method;

    fn template_route(responses: Vec<ResponseConfig>) -> RouteConfig {
        RouteConfig {
            function: "legacy".into(),
            method: "GET".into(),
            path: "/items".into(),
            integration: IntegrationStyle::Lambda,
            responses,
            ..Default::default()
        }
    }

    fn proxy_route(api: ApiKind) -> RouteConfig {
        RouteConfig {
            function: "proxy".into(),
            method: "GET".into(),
            path: "/items".into(),
            api,
            ..Default::default()
        }
    }

    fn map(config: RouteConfig, outcome: Result<Value, InvocationError>) -> Result<ResponseEnvelope, MappingError> {
        let request = snapshot(Method::GET, "/dev/items", "", &[], "");
        let matched = route_match_with(config, &request);
        let stage = Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default());
        map_response(
            &MappingInput {
                request: &request,
                route: &matched,
                stage: &stage,
            },
            outcome,
        )
    }

    fn text(envelope: &ResponseEnvelope) -> &str {
        match &envelope.body {
            ResponseBody::Text(text) => text,
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[test]
    fn test_error_status_derivation() {
        assert_eq!(error_status("[404] Not found", IntegrationKind::ProxyV1), StatusCode::NOT_FOUND);
        assert_eq!(error_status("Not found [404]", IntegrationKind::ProxyV1), StatusCode::BAD_GATEWAY);
        assert_eq!(error_status("boom", IntegrationKind::Template), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_template_selects_response_by_key() {
        let not_found = ResponseConfig {
            key: "404".into(),
            selection_pattern: None,
            status_code: Some(404),
            templates: Default::default(),
            parameters: Default::default(),
        };
        let envelope = map(
            template_route(vec![not_found]),
            Err(InvocationError::new("Error", "[404] Not Found")),
        )
        .unwrap();
        assert_eq!(envelope.status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_str(text(&envelope)).unwrap();
        assert_eq!(body["errorMessage"], "[404] Not Found");
        assert_eq!(body["errorType"], "Error");
    }

    #[test]
    fn test_template_parameters_and_headers() {
        let mut config = template_route(vec![ResponseConfig {
            key: "default".into(),
            selection_pattern: None,
            status_code: Some(201),
            templates: Default::default(),
            parameters: [
                ("method.response.header.Location".to_string(), "integration.response.body.redirect.url".to_string()),
                ("method.response.header.X-Static".to_string(), "'fixed'".to_string()),
                ("method.response.header.X-Empty".to_string(), "integration.response.body.missing".to_string()),
                ("method.request.header.Nope".to_string(), "'x'".to_string()),
            ]
            .into_iter()
            .collect(),
        }]);
        config.response.headers.insert("X-Route".into(), "'route'".into());

        let envelope = map(config, Ok(json!({"redirect": {"url": "/next"}}))).unwrap();
        assert_eq!(envelope.status, StatusCode::CREATED);
        assert_eq!(envelope.header("location"), Some("/next"));
        assert_eq!(envelope.header("x-static"), Some("fixed"));
        assert_eq!(envelope.header("x-route"), Some("route"));
        assert!(!envelope.has_header("x-empty"));
        assert!(!envelope.has_header("nope"));
        assert_eq!(envelope.header("content-type"), Some("application/json"));
        assert_eq!(text(&envelope), r#"{"redirect":{"url":"/next"}}"#);
    }

    #[test]
    fn test_template_response_template_and_string_result() {
        let mut config = template_route(Vec::new());
        config.response.template = Some("$input.path('$.message')".into());
        let envelope = map(config, Ok(json!({"message": "hello"}))).unwrap();
        assert_eq!(text(&envelope), "\"hello\"");
    }

    #[test]
    fn test_convert_to_binary() {
        let mut config = template_route(Vec::new());
        config.response.content_handling = Some("CONVERT_TO_BINARY".into());
        let envelope = map(config, Ok(json!("aGk="))).unwrap();
        assert_eq!(envelope.body, ResponseBody::Binary(Bytes::from_static(b"hi")));
    }

    #[test]
    fn test_proxy_v1_result() {
        let envelope = map(
            proxy_route(ApiKind::Rest),
            Ok(json!({
                "statusCode": "201",
                "headers": {"X-A": "1", "Set-Cookie": "a=b"},
                "multiValueHeaders": {"X-A": ["2"], "set-cookie": ["c=d=e"]},
                "body": "{\"ok\":true}"
            })),
        )
        .unwrap();
        assert_eq!(envelope.status, StatusCode::CREATED);
        let values: Vec<_> = envelope.headers.iter().filter(|(n, _)| n == "X-A").map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(
            envelope.cookies,
            vec![("a".to_string(), "b".to_string()), ("c".to_string(), "d=e".to_string())]
        );
        assert_eq!(envelope.header("content-type"), Some("application/json"));
        assert_eq!(text(&envelope), "{\"ok\":true}");
    }

    #[test]
    fn test_proxy_body_must_be_string() {
        let error = map(proxy_route(ApiKind::Rest), Ok(json!({"statusCode": 200, "body": {"a": 1}}))).unwrap_err();
        assert_eq!(error, MappingError::BodyNotStringified);
        assert_eq!(error.to_envelope().status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_proxy_base64_body() {
        let envelope = map(
            proxy_route(ApiKind::Rest),
            Ok(json!({"statusCode": 200, "body": "aGk=", "isBase64Encoded": true, "headers": {"Content-Type": "image/png"}})),
        )
        .unwrap();
        assert_eq!(envelope.body, ResponseBody::Binary(Bytes::from_static(b"hi")));
        assert_eq!(envelope.header("content-type"), Some("image/png"));
    }

    #[test]
    fn test_proxy_v2_wraps_plain_results() {
        let envelope = map(proxy_route(ApiKind::Http), Ok(json!({"hello": "world"}))).unwrap();
        assert_eq!(envelope.status, StatusCode::OK);
        assert_eq!(text(&envelope), r#"{"hello":"world"}"#);

        let envelope = map(proxy_route(ApiKind::Http), Ok(json!("plain"))).unwrap();
        assert_eq!(text(&envelope), "plain");

        let envelope = map(
            proxy_route(ApiKind::Http),
            Ok(json!({"statusCode": 204, "cookies": ["v2=1"]})),
        )
        .unwrap();
        assert_eq!(envelope.status, StatusCode::NO_CONTENT);
        assert_eq!(envelope.cookies, vec![("v2".to_string(), "1".to_string())]);
        assert_eq!(envelope.body, ResponseBody::Empty);
    }

    #[test]
    fn test_proxy_errors() {
        let envelope = map(
            proxy_route(ApiKind::Rest),
            Err(InvocationError::new("Error", "[403] nope")),
        )
        .unwrap();
        assert_eq!(envelope.status, StatusCode::FORBIDDEN);

        let envelope = map(proxy_route(ApiKind::Rest), Err(InvocationError::new("Error", "boom"))).unwrap();
        assert_eq!(envelope.status, StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_str(text(&envelope)).unwrap();
        assert_eq!(body["errorMessage"], "boom");

        let envelope = map(proxy_route(ApiKind::Rest), Ok(Value::Null)).unwrap();
        assert_eq!(envelope.status, StatusCode::BAD_GATEWAY);
    }
}
