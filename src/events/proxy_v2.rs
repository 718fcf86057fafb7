//! Proxy integration events, payload format 2.0.

use serde::Serialize;
use serde_json::{Map, Value};

use super::identity::{bearer_claims, claim_scopes, new_request_id, request_time};
use super::overrides::sentinel;
use super::proxy_v1::add_body_headers;
use super::snapshot::path_parameters_value;
use super::{credentials_authorizer, EventInput, SynthesisError};

/// Header carrying a JSON authorizer map that replaces the computed one.
pub const AUTHORIZER_OVERRIDE_HEADER: &str = "sls-offline-authorizer-override";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEventV2 {
    pub version: &'static str,
    pub route_key: String,
    pub raw_path: String,
    pub raw_query_string: String,
    pub cookies: Vec<String>,
    pub headers: Map<String, Value>,
    pub query_string_parameters: Option<Map<String, Value>>,
    pub request_context: RequestContextV2,
    pub body: Option<String>,
    pub path_parameters: Value,
    pub is_base64_encoded: bool,
    pub stage_variables: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextV2 {
    pub account_id: String,
    pub api_id: String,
    pub authorizer: Map<String, Value>,
    pub domain_name: String,
    pub domain_prefix: String,
    pub http: HttpDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub request_id: String,
    pub route_key: String,
    pub stage: String,
    pub time: String,
    pub time_epoch: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpDescription {
    pub method: String,
    pub path: String,
    pub protocol: &'static str,
    pub source_ip: String,
    pub user_agent: String,
}

/// Build a payload 2.0 proxy event.
pub fn create(input: &EventInput<'_>) -> Result<Value, SynthesisError> {
    let request = input.request;
    let route = &input.route.route;
    let stage = input.stage;

    let mut headers = request.joined_headers();
    add_body_headers(&mut headers, request, "content-length", "content-type");
    let (body, is_base64_encoded) = request.event_body();

    let authorizer = header_override(input)
        .or_else(|| stage.overrides.authorizer.clone())
        .unwrap_or_else(|| {
            let mut authorizer = credentials_authorizer(input.credentials);
            let claims = input
                .credentials
                .and_then(|c| c.claims.clone())
                .or_else(|| bearer_claims(request));
            let scopes = input
                .credentials
                .and_then(|c| c.scopes.clone())
                .or_else(|| claims.as_ref().and_then(claim_scopes));
            let mut jwt = Map::new();
            if let Some(claims) = claims {
                jwt.insert("claims".into(), claims);
            }
            if let Some(scopes) = scopes {
                jwt.insert("scopes".into(), scopes.into());
            }
            authorizer.insert("jwt".into(), Value::Object(jwt));
            authorizer
        });

    let event = ProxyEventV2 {
        version: "2.0",
        route_key: route.route_key.clone(),
        raw_path: request.path.clone(),
        raw_query_string: request.raw_query.clone(),
        cookies: request.cookies(),
        headers,
        query_string_parameters: request.joined_query(),
        request_context: RequestContextV2 {
            account_id: stage
                .overrides
                .account_id
                .clone()
                .unwrap_or_else(|| sentinel::ACCOUNT_ID.to_string()),
            api_id: sentinel::API_ID.to_string(),
            authorizer,
            domain_name: sentinel::DOMAIN_NAME.to_string(),
            domain_prefix: sentinel::DOMAIN_PREFIX.to_string(),
            http: HttpDescription {
                method: request.method.as_str().to_string(),
                path: request.path.clone(),
                protocol: "HTTP/1.1",
                source_ip: request.source_ip.clone(),
                user_agent: request.header("user-agent").unwrap_or_default().to_string(),
            },
            operation_name: route.operation_name.clone(),
            request_id: new_request_id(),
            route_key: route.route_key.clone(),
            stage: route.event_stage(stage).to_string(),
            time: request_time(request.received_at),
            time_epoch: request.epoch_millis(),
        },
        body,
        path_parameters: path_parameters_value(&input.route.path_parameters),
        is_base64_encoded,
        stage_variables: stage.variables_value(),
    };
    Ok(serde_json::to_value(event)?)
}

fn header_override(input: &EventInput<'_>) -> Option<Map<String, Value>> {
    let raw = input.request.header(AUTHORIZER_OVERRIDE_HEADER)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => {
            tracing::error!(
                header = AUTHORIZER_OVERRIDE_HEADER,
                "Could not parse authorizer override header as a JSON object"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::config::{ApiKind, GatewaySettings, RouteConfig};
    use crate::events::identity::tests::token;
    use crate::events::overrides::{EnvironmentOverrides, Stage};
    use crate::events::snapshot::tests::snapshot;
    use crate::events::snapshot::RequestSnapshot;
    use crate::routing::tests::route_match_with;
    use crate::routing::RouteMatch;
    use axum::http::Method;
    use serde_json::json;

    fn http_route(method: &str, path: &str) -> RouteConfig {
        RouteConfig {
            function: "fn".into(),
            method: method.into(),
            path: path.into(),
            api: ApiKind::Http,
            ..Default::default()
        }
    }

    fn stage() -> Stage {
        Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default())
    }

    fn event_for(request: &RequestSnapshot, matched: &RouteMatch, credentials: Option<&Credentials>) -> Value {
        create(&EventInput {
            request,
            route: matched,
            stage: &stage(),
            credentials,
            payload: &Value::Null,
        })
        .unwrap()
    }

    #[test]
    fn test_event_shape() {
        let request = snapshot(
            Method::POST,
            "/items/9",
            "a=1&a=2&b=3",
            &[("X-Multi", "1"), ("x-multi", "2"), ("cookie", "s=1; t=2"), ("user-agent", "ua")],
            "{}",
        );
        let matched = route_match_with(http_route("POST", "/items/{id}"), &request);
        let event = event_for(&request, &matched, None);

        assert_eq!(event["version"], "2.0");
        assert_eq!(event["routeKey"], "POST /items/{id}");
        assert_eq!(event["rawPath"], "/items/9");
        assert_eq!(event["rawQueryString"], "a=1&a=2&b=3");
        assert_eq!(event["cookies"], json!(["s=1", "t=2"]));
        assert_eq!(event["headers"]["x-multi"], "1,2");
        assert_eq!(event["headers"]["content-type"], "application/json");
        assert_eq!(event["headers"]["content-length"], "2");
        assert_eq!(event["queryStringParameters"], json!({"a": "1,2", "b": "3"}));
        assert_eq!(event["pathParameters"], json!({"id": "9"}));
        assert_eq!(event["body"], "{}");
        assert_eq!(event["requestContext"]["http"]["method"], "POST");
        assert_eq!(event["requestContext"]["http"]["userAgent"], "ua");
        assert_eq!(event["requestContext"]["stage"], "$default");
        assert_eq!(event["requestContext"]["routeKey"], "POST /items/{id}");
    }

    #[test]
    fn test_empty_query_and_body() {
        let request = snapshot(Method::GET, "/items", "", &[], "");
        let matched = route_match_with(http_route("GET", "/items"), &request);
        let event = event_for(&request, &matched, None);
        assert_eq!(event["queryStringParameters"], Value::Null);
        assert_eq!(event["body"], Value::Null);
        assert_eq!(event["pathParameters"], Value::Null);
        assert_eq!(event["cookies"], json!([]));
    }

    #[test]
    fn test_jwt_authorizer_section() {
        let header = format!("Bearer {}", token(&json!({"sub": "u1", "scope": "a b"})));
        let request = snapshot(Method::GET, "/items", "", &[("authorization", &header)], "");
        let matched = route_match_with(http_route("GET", "/items"), &request);
        let event = event_for(&request, &matched, None);
        assert_eq!(event["requestContext"]["authorizer"]["jwt"]["claims"]["sub"], "u1");
        assert_eq!(event["requestContext"]["authorizer"]["jwt"]["scopes"], json!(["a", "b"]));

        let verified = Credentials::from_jwt(json!({"sub": "verified"}), Some(vec!["x".into()]));
        let event = event_for(&request, &matched, Some(&verified));
        assert_eq!(event["requestContext"]["authorizer"]["jwt"]["claims"]["sub"], "verified");
        assert_eq!(event["requestContext"]["authorizer"]["jwt"]["scopes"], json!(["x"]));
    }

    #[test]
    fn test_authorizer_override_header() {
        let request = snapshot(
            Method::GET,
            "/items",
            "",
            &[(AUTHORIZER_OVERRIDE_HEADER, r#"{"lambda":{"user":"o"}}"#)],
            "",
        );
        let matched = route_match_with(http_route("GET", "/items"), &request);
        let event = event_for(&request, &matched, None);
        assert_eq!(event["requestContext"]["authorizer"], json!({"lambda": {"user": "o"}}));
    }

    #[test]
    fn test_default_route_key() {
        let request = snapshot(Method::DELETE, "/any/thing", "", &[], "");
        let matched = route_match_with(http_route("ANY", "$default"), &request);
        let event = event_for(&request, &matched, None);
        assert_eq!(event["routeKey"], "$default");
        assert_eq!(event["rawPath"], "/any/thing");
    }
}
