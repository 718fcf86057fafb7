//! Events sent to custom authorizer functions.

use axum::http::Method;
use serde_json::{json, Map, Value};

use super::identity::request_time;
use super::overrides::Stage;
use super::snapshot::{path_parameters_value, RequestSnapshot};
use crate::routing::RouteMatch;

pub const ACCOUNT_ID: &str = "random-account-id";
pub const API_ID: &str = "random-api-id";

/// `arn:aws:execute-api:{region}:{account}:{api}/{stage}/{METHOD}{resourcePath}`
pub fn method_arn(stage: &Stage, method: &Method, resource_path: &str) -> String {
    format!(
        "arn:aws:execute-api:{}:{ACCOUNT_ID}:{API_ID}/{}/{}{}",
        stage.region,
        stage.name,
        method.as_str(),
        resource_path
    )
}

fn base_event(request: &RequestSnapshot, route: &RouteMatch, stage: &Stage, method_arn: &str) -> Map<String, Value> {
    let resource_path = route.arn_resource();
    let event = json!({
        "enhancedAuthContext": {},
        "methodArn": method_arn,
        "requestContext": {
            "accountId": ACCOUNT_ID,
            "apiId": API_ID,
            "httpMethod": request.method.as_str(),
            "requestId": "random-request-id",
            "resourceId": "random-resource-id",
            "resourcePath": resource_path,
            "path": request.path,
            "stage": stage.name,
        },
        "resource": resource_path,
    });
    match event {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// TOKEN authorizer event.
pub fn token_event(token: &str, request: &RequestSnapshot, route: &RouteMatch, stage: &Stage, method_arn: &str) -> Value {
    let mut event = base_event(request, route, stage, method_arn);
    event.insert("authorizationToken".into(), Value::String(token.to_string()));
    event.insert("type".into(), Value::String("TOKEN".into()));
    Value::Object(event)
}

/// REQUEST authorizer event, payload version 1.0.
pub fn request_event_v1(request: &RequestSnapshot, route: &RouteMatch, stage: &Stage, method_arn: &str) -> Value {
    let mut event = base_event(request, route, stage, method_arn);
    let fields = [
        ("headers", Value::Object(request.single_value_headers())),
        ("httpMethod", Value::String(request.method.as_str().to_string())),
        ("multiValueHeaders", Value::Object(request.multi_value_headers())),
        (
            "multiValueQueryStringParameters",
            request.multi_value_query().map(Value::Object).unwrap_or(Value::Null),
        ),
        ("path", Value::String(request.path.clone())),
        ("pathParameters", path_parameters_value(&route.path_parameters)),
        (
            "queryStringParameters",
            request.single_value_query().map(Value::Object).unwrap_or(Value::Null),
        ),
        ("stageVariables", stage.variables_value()),
        ("type", Value::String("REQUEST".into())),
    ];
    for (key, value) in fields {
        event.insert(key.into(), value);
    }
    Value::Object(event)
}

/// REQUEST authorizer event, payload version 2.0.
pub fn request_event_v2(
    request: &RequestSnapshot,
    route: &RouteMatch,
    stage: &Stage,
    method_arn: &str,
    identity_sources: &[String],
) -> Value {
    let headers = request.joined_headers();
    let identity_source: Vec<Value> = identity_sources
        .iter()
        .filter_map(|source| resolve_identity_source(source, request, route))
        .map(Value::String)
        .collect();

    json!({
        "version": "2.0",
        "type": "REQUEST",
        "routeArn": method_arn,
        "identitySource": identity_source,
        "routeKey": route.route.route_key,
        "rawPath": request.path,
        "rawQueryString": request.raw_query,
        "cookies": request.cookies(),
        "headers": headers,
        "queryStringParameters": request.joined_query().map(Value::Object).unwrap_or(Value::Null),
        "pathParameters": path_parameters_value(&route.path_parameters),
        "stageVariables": stage.variables_value(),
        "requestContext": {
            "accountId": ACCOUNT_ID,
            "apiId": API_ID,
            "domainName": super::overrides::sentinel::DOMAIN_NAME,
            "domainPrefix": super::overrides::sentinel::DOMAIN_PREFIX,
            "http": {
                "method": request.method.as_str(),
                "path": request.path,
                "protocol": "HTTP/1.1",
                "sourceIp": request.source_ip,
                "userAgent": request.header("user-agent").unwrap_or_default(),
            },
            "requestId": "random-request-id",
            "routeKey": route.route.route_key,
            "stage": stage.name,
            "time": request_time(request.received_at),
            "timeEpoch": request.epoch_millis(),
        },
    })
}

/// Value named by `$request.header.X`, `$request.querystring.X`,
/// `$context.X` or `$stageVariables.X` style identity sources.
fn resolve_identity_source(source: &str, request: &RequestSnapshot, route: &RouteMatch) -> Option<String> {
    if let Some(name) = source
        .strip_prefix("$request.header.")
        .or_else(|| source.strip_prefix("method.request.header."))
    {
        return request.header(name).map(str::to_string);
    }
    if let Some(name) = source
        .strip_prefix("$request.querystring.")
        .or_else(|| source.strip_prefix("method.request.querystring."))
    {
        return request
            .query_pairs()
            .into_iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v);
    }
    if let Some(name) = source.strip_prefix("$request.path.") {
        return route.path_parameters.get(name).cloned();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;
    use crate::events::overrides::EnvironmentOverrides;
    use crate::events::snapshot::tests::snapshot;
    use crate::routing::tests::route_match;

    fn stage() -> Stage {
        Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default())
    }

    #[test]
    fn test_method_arn() {
        assert_eq!(
            method_arn(&stage(), &Method::GET, "/users/{id}"),
            "arn:aws:execute-api:us-east-1:random-account-id:random-api-id/dev/GET/users/{id}"
        );
    }

    #[test]
    fn test_token_event_shape() {
        let request = snapshot(Method::GET, "/dev/users/7", "", &[("authorization", "abc")], "");
        let matched = route_match("GET", "/users/{id}", &request);
        let arn = method_arn(&stage(), &request.method, matched.arn_resource());
        let event = token_event("abc", &request, &matched, &stage(), &arn);
        assert_eq!(event["type"], "TOKEN");
        assert_eq!(event["authorizationToken"], "abc");
        assert_eq!(event["methodArn"], arn);
        assert_eq!(event["requestContext"]["resourcePath"], "/users/{id}");
        assert_eq!(event["resource"], "/users/{id}");
        assert_eq!(event["enhancedAuthContext"], json!({}));
    }

    #[test]
    fn test_request_event_v1_shape() {
        let request = snapshot(Method::GET, "/dev/users/7", "a=1&a=2", &[("x-h", "1"), ("x-h", "2")], "");
        let matched = route_match("GET", "/users/{id}", &request);
        let event = request_event_v1(&request, &matched, &stage(), "arn");
        assert_eq!(event["type"], "REQUEST");
        assert_eq!(event["headers"]["x-h"], "2");
        assert_eq!(event["multiValueHeaders"]["x-h"], json!(["1", "2"]));
        assert_eq!(event["queryStringParameters"]["a"], "2");
        assert_eq!(event["multiValueQueryStringParameters"]["a"], json!(["1", "2"]));
        assert_eq!(event["pathParameters"]["id"], "7");
    }

    #[test]
    fn test_request_event_v2_identity_sources() {
        let request = snapshot(Method::GET, "/users/7", "token=q", &[("x-key", "k")], "");
        let matched = route_match("GET", "/users/{id}", &request);
        let sources = vec![
            "$request.header.X-Key".to_string(),
            "$request.querystring.token".to_string(),
            "$request.header.Missing".to_string(),
        ];
        let event = request_event_v2(&request, &matched, &stage(), "arn", &sources);
        assert_eq!(event["version"], "2.0");
        assert_eq!(event["identitySource"], json!(["k", "q"]));
        assert_eq!(event["routeArn"], "arn");
        assert_eq!(event["rawQueryString"], "token=q");
    }
}
