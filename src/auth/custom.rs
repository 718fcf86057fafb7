//! Custom (function backed) authorizers.
//!
//! # Responsibilities
//! - Build the TOKEN or REQUEST event for the authorizer function
//! - Invoke it and interpret the result: simple responses, principal,
//!   policy document and context
//!
//! # Design Decisions
//! - An invocation failure is an authentication failure (401), never a
//!   gateway error
//! - Context values are checked and normalized to strings before they are
//!   exposed to the integration

use serde_json::{Map, Value};

use super::policy::can_execute;
use super::{AuthorizerOutcome, Credentials, CustomAuthorizer, CustomKind, PayloadVersion, Rejection};
use crate::events::authorizer::{method_arn, request_event_v1, request_event_v2, token_event};
use crate::events::overrides::Stage;
use crate::events::snapshot::RequestSnapshot;
use crate::invoke::Dispatcher;
use crate::routing::RouteMatch;
use crate::template::stringify;

/// Run a custom authorizer for an HTTP request.
pub async fn authenticate(
    authorizer: &CustomAuthorizer,
    request: &RequestSnapshot,
    route: &RouteMatch,
    stage: &Stage,
    dispatcher: &Dispatcher,
) -> AuthorizerOutcome {
    tracing::info!(
        method = %request.method,
        path = %request.path,
        authorizer = %authorizer.name,
        function = %authorizer.function,
        "Running authorization function"
    );

    let arn = method_arn(stage, &request.method, route.arn_resource());
    let event = match authorizer.kind {
        CustomKind::Token => {
            let header = authorizer.identity_header.as_deref().unwrap_or("authorization");
            let token = request.header(header).unwrap_or_default();
            let token = match &authorizer.identity_validation {
                Some(expression) if !expression.is_match(token) => "",
                _ => token,
            };
            tracing::debug!(header = %header, token = %token, "Retrieved identity token");
            token_event(token, request, route, stage, &arn)
        }
        CustomKind::Request => match authorizer.payload_version {
            PayloadVersion::V1 => request_event_v1(request, route, stage, &arn),
            PayloadVersion::V2 => request_event_v2(request, route, stage, &arn, &authorizer.identity_sources),
        },
    };

    let result = match dispatcher.invoke(&authorizer.function, event).await {
        Ok(output) => output.result,
        Err(e) => {
            tracing::info!(
                authorizer = %authorizer.name,
                error = %e,
                "Authorization function returned an error response"
            );
            return AuthorizerOutcome::Deny(Rejection::unauthorized("Unauthorized"));
        }
    };

    let simple = authorizer.enable_simple_responses && authorizer.payload_version == PayloadVersion::V2;
    let outcome = evaluate(&result, &arn, simple);
    log_outcome(&authorizer.name, &outcome);
    outcome
}

fn log_outcome(name: &str, outcome: &AuthorizerOutcome) {
    match outcome {
        AuthorizerOutcome::Allow(_) => {
            tracing::info!(authorizer = %name, "Authorization function returned a successful response");
        }
        AuthorizerOutcome::Deny(rejection) => {
            tracing::info!(authorizer = %name, reason = %rejection.message, "Authorization denied");
        }
        AuthorizerOutcome::Error(detail) => {
            tracing::error!(authorizer = %name, detail = %detail, "Authorizer configuration error");
        }
    }
}

/// Interpret an authorizer function result for `method_arn`.
pub fn evaluate(result: &Value, method_arn: &str, simple_responses: bool) -> AuthorizerOutcome {
    if result.as_str() == Some("Unauthorized") {
        return AuthorizerOutcome::Deny(Rejection::unauthorized("Unauthorized"));
    }

    if simple_responses {
        return match result.get("isAuthorized").and_then(Value::as_bool) {
            Some(true) => {
                let context = result.get("context").and_then(Value::as_object).cloned().unwrap_or_default();
                AuthorizerOutcome::Allow(Credentials::from_custom(None, context))
            }
            _ => AuthorizerOutcome::Deny(Rejection::forbidden(
                "User is not authorized to access this resource",
            )),
        };
    }

    let principal_id = match result.get("principalId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return AuthorizerOutcome::Deny(Rejection::forbidden("No principalId set on the Response")),
    };

    let policy = result.get("policyDocument").unwrap_or(&Value::Null);
    if !can_execute(policy, method_arn) {
        return AuthorizerOutcome::Deny(Rejection::forbidden(
            "User is not authorized to access this resource",
        ));
    }

    let context = match result.get("context") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(context)) => match normalize_context(context) {
            Ok(context) => context,
            Err(detail) => return AuthorizerOutcome::Error(detail),
        },
        Some(_) => {
            return AuthorizerOutcome::Error("Authorizer response context must be an object".into());
        }
    };

    let mut credentials = Credentials::from_custom(Some(principal_id), context);
    credentials.usage_identifier_key = result
        .get("usageIdentifierKey")
        .and_then(Value::as_str)
        .map(str::to_string);
    AuthorizerOutcome::Allow(credentials)
}

/// Check that every context value is a string, number or boolean and turn
/// them all into strings.
pub fn normalize_context(context: &Map<String, Value>) -> Result<Map<String, Value>, String> {
    context
        .iter()
        .map(|(key, value)| match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok((key.clone(), Value::String(stringify(value)))),
            _ => Err(format!(
                "Authorizer response context values must be of type string, number, or boolean (key '{key}')"
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizerConfig, AuthorizerKind, GatewaySettings};
    use crate::events::overrides::EnvironmentOverrides;
    use crate::events::snapshot::tests::snapshot;
    use crate::invoke::tests::dispatcher;
    use crate::invoke::InvocationError;
    use crate::routing::tests::route_match;
    use crate::auth::AuthorizerDescriptor;
    use crate::config::ApiKind;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    const ARN: &str = "arn:aws:execute-api:us-east-1:random-account-id:random-api-id/dev/GET/items";

    fn allow(principal: &str) -> Value {
        json!({
            "principalId": principal,
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [{ "Action": "execute-api:Invoke", "Effect": "Allow", "Resource": "*" }]
            },
            "context": { "n": 5, "flag": true, "name": "x" },
            "usageIdentifierKey": "key-1"
        })
    }

    #[test]
    fn test_evaluate_allow_normalizes_context() {
        match evaluate(&allow("user-1"), ARN, false) {
            AuthorizerOutcome::Allow(credentials) => {
                assert_eq!(credentials.principal_id.as_deref(), Some("user-1"));
                assert_eq!(credentials.context["n"], "5");
                assert_eq!(credentials.context["flag"], "true");
                assert_eq!(credentials.usage_identifier_key.as_deref(), Some("key-1"));
                assert_eq!(credentials.authorizer_map()["integrationLatency"], "42");
                assert_eq!(credentials.authorizer_map()["principalId"], "user-1");
            }
            other => panic!("expected allow, got {other:?}"),
        }
    }

    #[test]
    fn test_evaluate_rejections() {
        let deny = |outcome: AuthorizerOutcome| match outcome {
            AuthorizerOutcome::Deny(r) => (r.status, r.message),
            other => panic!("expected deny, got {other:?}"),
        };

        assert_eq!(
            deny(evaluate(&json!("Unauthorized"), ARN, false)),
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
        );
        assert_eq!(
            deny(evaluate(&json!({"policyDocument": {}}), ARN, false)),
            (StatusCode::FORBIDDEN, "No principalId set on the Response".to_string())
        );

        let mut denied = allow("u");
        denied["policyDocument"]["Statement"][0]["Effect"] = json!("Deny");
        assert_eq!(
            deny(evaluate(&denied, ARN, false)),
            (StatusCode::FORBIDDEN, "User is not authorized to access this resource".to_string())
        );
    }

    #[test]
    fn test_evaluate_bad_context_is_configuration_error() {
        let mut result = allow("u");
        result["context"] = json!({ "nested": { "a": 1 } });
        assert!(matches!(evaluate(&result, ARN, false), AuthorizerOutcome::Error(_)));
    }

    #[test]
    fn test_simple_responses() {
        let ok = evaluate(&json!({"isAuthorized": true, "context": {"a": "b"}}), ARN, true);
        match ok {
            AuthorizerOutcome::Allow(credentials) => assert_eq!(credentials.authorizer_map()["a"], "b"),
            other => panic!("expected allow, got {other:?}"),
        }
        let denied = evaluate(&json!({"isAuthorized": false}), ARN, true);
        assert!(matches!(denied, AuthorizerOutcome::Deny(r) if r.status == StatusCode::FORBIDDEN));
    }

    fn token_authorizer(expression: Option<&str>) -> CustomAuthorizer {
        let config = AuthorizerConfig {
            kind: AuthorizerKind::Token,
            function: Some("auth".into()),
            identity_validation_expression: expression.map(str::to_string),
            ..Default::default()
        };
        match AuthorizerDescriptor::from_config("auth", &config, ApiKind::Rest, &[]).unwrap() {
            AuthorizerDescriptor::Custom(c) => c,
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_flow_sends_token_event() {
        let dispatcher = dispatcher(|_, event| {
            assert_eq!(event["type"], "TOKEN");
            assert_eq!(event["authorizationToken"], "Bearer good");
            Ok(allow("user-9"))
        });
        let stage = Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default());
        let request = snapshot(Method::GET, "/dev/items", "", &[("authorization", "Bearer good")], "");
        let matched = route_match("GET", "/items", &request);

        let outcome = authenticate(&token_authorizer(None), &request, &matched, &stage, &dispatcher).await;
        assert!(matches!(outcome, AuthorizerOutcome::Allow(c) if c.principal_id.as_deref() == Some("user-9")));
    }

    #[tokio::test]
    async fn test_token_failing_validation_is_blanked() {
        let dispatcher = dispatcher(|_, event| {
            assert_eq!(event["authorizationToken"], "");
            Ok(json!("Unauthorized"))
        });
        let stage = Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default());
        let request = snapshot(Method::GET, "/dev/items", "", &[("authorization", "nope")], "");
        let matched = route_match("GET", "/items", &request);

        let outcome =
            authenticate(&token_authorizer(Some("^Bearer .+$")), &request, &matched, &stage, &dispatcher).await;
        assert!(matches!(outcome, AuthorizerOutcome::Deny(r) if r.status == StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_invocation_error_is_unauthorized() {
        let dispatcher = dispatcher(|_, _| Err(InvocationError::new("Error", "boom")));
        let stage = Stage::new(&GatewaySettings::default(), EnvironmentOverrides::default());
        let request = snapshot(Method::GET, "/dev/items", "", &[], "");
        let matched = route_match("GET", "/items", &request);

        let outcome = authenticate(&token_authorizer(None), &request, &matched, &stage, &dispatcher).await;
        assert!(matches!(outcome, AuthorizerOutcome::Deny(r) if r.message == "Unauthorized"));
    }
}
