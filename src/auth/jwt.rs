//! Built-in JWT authorizer.
//!
//! # Responsibilities
//! - Read the bearer token from the configured header
//! - Check expiry, issuer, audience and route scopes
//! - Optionally verify the signature with a configured key
//!
//! # Design Decisions
//! - Signatures are not checked unless a key is configured, matching how
//!   local development tokens are usually minted
//! - Claims are kept as raw JSON so custom claims reach the function

use chrono::Utc;
use jsonwebtoken::{decode, Validation};
use serde_json::Value;

use super::{AuthorizerOutcome, Credentials, JwtAuthorizer, JwtVerification, Rejection};
use crate::events::identity::decode_claims;
use crate::events::snapshot::RequestSnapshot;

/// Run the JWT checks for one request.
pub fn authenticate(authorizer: &JwtAuthorizer, request: &RequestSnapshot) -> AuthorizerOutcome {
    let Some(header) = request.header(&authorizer.identity_header) else {
        tracing::debug!(authorizer = %authorizer.name, "Identity header missing");
        return AuthorizerOutcome::Deny(Rejection::unauthorized("Unauthorized"));
    };
    let token = strip_bearer(header);

    let claims = match &authorizer.verification {
        Some(verification) => verified_claims(token, verification),
        None => decode_claims(token),
    };
    let Some(claims) = claims else {
        return AuthorizerOutcome::Deny(Rejection::unauthorized("Unauthorized"));
    };

    if let Some(exp) = claims.get("exp").and_then(Value::as_f64) {
        if exp * 1000.0 < Utc::now().timestamp_millis() as f64 {
            return AuthorizerOutcome::Deny(Rejection::unauthorized("JWT Token expired"));
        }
    }

    if claims.get("iss").and_then(Value::as_str) != Some(authorizer.issuer_url.as_str()) {
        return AuthorizerOutcome::Deny(Rejection::unauthorized(
            "JWT Token not from correct issuer url",
        ));
    }

    if !audience_matches(&claims, &authorizer.audience) {
        return AuthorizerOutcome::Deny(Rejection::unauthorized(
            "JWT Token does not contain correct audience",
        ));
    }

    let token_scopes = token_scopes(&claims);
    if !authorizer.scopes.is_empty() {
        let granted = token_scopes
            .as_ref()
            .is_some_and(|scopes| scopes.iter().any(|s| authorizer.scopes.contains(s)));
        if !granted {
            return AuthorizerOutcome::Deny(Rejection::forbidden("JWT Token missing valid scope"));
        }
    }

    tracing::debug!(authorizer = %authorizer.name, "JWT accepted");
    AuthorizerOutcome::Allow(Credentials::from_jwt(claims, token_scopes))
}

fn strip_bearer(header: &str) -> &str {
    match header.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => header[7..].trim_start(),
        _ => header,
    }
}

fn verified_claims(token: &str, verification: &JwtVerification) -> Option<Value> {
    let mut validation = Validation::new(verification.algorithm);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    match decode::<Value>(token, &verification.key, &validation) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "JWT signature verification failed");
            None
        }
    }
}

fn audience_matches(claims: &Value, accepted: &[String]) -> bool {
    let accepts = |value: &str| accepted.iter().any(|a| a == value);
    let from_aud = match claims.get("aud") {
        Some(Value::String(aud)) => accepts(aud),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).any(accepts),
        _ => false,
    };
    from_aud
        || claims
            .get("client_id")
            .and_then(Value::as_str)
            .is_some_and(accepts)
}

/// Scopes from `scp` (list or string) or the space separated `scope` claim.
fn token_scopes(claims: &Value) -> Option<Vec<String>> {
    let split = |s: &str| s.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
    match claims.get("scp") {
        Some(Value::Array(items)) => Some(items.iter().filter_map(Value::as_str).map(str::to_string).collect()),
        Some(Value::String(s)) => Some(split(s)),
        _ => claims.get("scope").and_then(Value::as_str).map(split),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::identity::tests::token;
    use crate::events::snapshot::tests::snapshot;
    use axum::http::Method;
    use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
    use serde_json::json;
    use std::sync::Arc;

    fn authorizer(scopes: &[&str]) -> JwtAuthorizer {
        JwtAuthorizer {
            name: "jwt".into(),
            issuer_url: "https://issuer.example".into(),
            audience: vec!["api1".into(), "api2".into()],
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            identity_header: "authorization".into(),
            verification: None,
        }
    }

    fn run(authorizer: &JwtAuthorizer, claims: Value) -> AuthorizerOutcome {
        let header = format!("Bearer {}", token(&claims));
        let request = snapshot(Method::GET, "/", "", &[("authorization", &header)], "");
        authenticate(authorizer, &request)
    }

    fn future() -> i64 {
        Utc::now().timestamp() + 3600
    }

    fn deny_message(outcome: AuthorizerOutcome) -> (u16, String) {
        match outcome {
            AuthorizerOutcome::Deny(r) => (r.status.as_u16(), r.message),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_audience_scenario() {
        let ok = run(
            &authorizer(&[]),
            json!({"iss": "https://issuer.example", "aud": "api1", "exp": future()}),
        );
        assert!(matches!(ok, AuthorizerOutcome::Allow(_)));

        let wrong = run(
            &authorizer(&[]),
            json!({"iss": "https://issuer.example", "aud": "api3", "exp": future()}),
        );
        assert_eq!(
            deny_message(wrong),
            (401, "JWT Token does not contain correct audience".into())
        );
    }

    #[test]
    fn test_client_id_fallback_and_array_audience() {
        let by_client = run(
            &authorizer(&[]),
            json!({"iss": "https://issuer.example", "client_id": "api2"}),
        );
        assert!(matches!(by_client, AuthorizerOutcome::Allow(_)));

        let by_list = run(
            &authorizer(&[]),
            json!({"iss": "https://issuer.example", "aud": ["x", "api2"]}),
        );
        assert!(matches!(by_list, AuthorizerOutcome::Allow(_)));
    }

    #[test]
    fn test_expired_and_wrong_issuer() {
        let expired = run(
            &authorizer(&[]),
            json!({"iss": "https://issuer.example", "aud": "api1", "exp": 1000}),
        );
        assert_eq!(deny_message(expired), (401, "JWT Token expired".into()));

        let issuer = run(&authorizer(&[]), json!({"iss": "https://other", "aud": "api1"}));
        assert_eq!(
            deny_message(issuer),
            (401, "JWT Token not from correct issuer url".into())
        );
    }

    #[test]
    fn test_scopes() {
        let claims = json!({"iss": "https://issuer.example", "aud": "api1", "scope": "read write"});
        match run(&authorizer(&["write"]), claims.clone()) {
            AuthorizerOutcome::Allow(credentials) => {
                assert_eq!(credentials.scopes.unwrap(), vec!["read", "write"]);
                assert_eq!(credentials.claims.unwrap()["aud"], "api1");
            }
            other => panic!("expected allow, got {other:?}"),
        }
        assert_eq!(
            deny_message(run(&authorizer(&["admin"]), claims)),
            (403, "JWT Token missing valid scope".into())
        );
    }

    #[test]
    fn test_missing_or_garbage_token() {
        let request = snapshot(Method::GET, "/", "", &[], "");
        assert_eq!(
            deny_message(authenticate(&authorizer(&[]), &request)),
            (401, "Unauthorized".into())
        );

        let request = snapshot(Method::GET, "/", "", &[("authorization", "Bearer nope")], "");
        assert_eq!(
            deny_message(authenticate(&authorizer(&[]), &request)),
            (401, "Unauthorized".into())
        );
    }

    #[test]
    fn test_signature_verification() {
        let mut jwt = authorizer(&[]);
        jwt.verification = Some(JwtVerification {
            algorithm: Algorithm::HS256,
            key: Arc::new(DecodingKey::from_secret(b"secret")),
        });
        let claims = json!({"iss": "https://issuer.example", "aud": "api1"});

        let signed = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        let header = format!("Bearer {signed}");
        let request = snapshot(Method::GET, "/", "", &[("authorization", &header)], "");
        assert!(matches!(authenticate(&jwt, &request), AuthorizerOutcome::Allow(_)));

        assert_eq!(deny_message(run(&jwt, claims)), (401, "Unauthorized".into()));
    }
}
