//! Request identity, timestamps and bearer token claims shared by events.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::overrides::{sentinel, EnvironmentOverrides};
use super::snapshot::RequestSnapshot;

/// `requestContext.identity` for a REST request.
pub fn request_identity(request: &RequestSnapshot, overrides: &EnvironmentOverrides) -> Map<String, Value> {
    let pick = |header: Option<&str>, value: &Option<String>, fallback: &str| -> Value {
        Value::String(
            header
                .map(str::to_string)
                .or_else(|| value.clone())
                .unwrap_or_else(|| fallback.to_string()),
        )
    };

    let mut identity = Map::new();
    identity.insert("accessKey".into(), Value::Null);
    identity.insert("accountId".into(), pick(None, &overrides.account_id, sentinel::ACCOUNT_ID));
    identity.insert("apiKey".into(), pick(None, &overrides.api_key, sentinel::API_KEY));
    identity.insert("apiKeyId".into(), pick(None, &overrides.api_key_id, sentinel::API_KEY_ID));
    identity.insert("caller".into(), pick(None, &overrides.caller, sentinel::CALLER));
    identity.insert(
        "cognitoAuthenticationProvider".into(),
        pick(
            request.header("cognito-authentication-provider"),
            &overrides.cognito_authentication_provider,
            sentinel::COGNITO_AUTHENTICATION_PROVIDER,
        ),
    );
    identity.insert(
        "cognitoAuthenticationType".into(),
        pick(
            None,
            &overrides.cognito_authentication_type,
            sentinel::COGNITO_AUTHENTICATION_TYPE,
        ),
    );
    identity.insert(
        "cognitoIdentityId".into(),
        pick(
            request.header("cognito-identity-id"),
            &overrides.cognito_identity_id,
            sentinel::COGNITO_IDENTITY_ID,
        ),
    );
    identity.insert(
        "cognitoIdentityPoolId".into(),
        pick(
            None,
            &overrides.cognito_identity_pool_id,
            sentinel::COGNITO_IDENTITY_POOL_ID,
        ),
    );
    identity.insert("principalOrgId".into(), Value::Null);
    identity.insert("sourceIp".into(), Value::String(request.source_ip.clone()));
    identity.insert("user".into(), Value::String(sentinel::USER.into()));
    identity.insert(
        "userAgent".into(),
        Value::String(request.header("user-agent").unwrap_or_default().to_string()),
    );
    identity.insert("userArn".into(), Value::String(sentinel::USER_ARN.into()));
    identity
}

/// Timestamp in common log format, e.g. `10/Mar/2024:14:05:09 +0000`.
pub fn request_time(at: DateTime<Utc>) -> String {
    at.format("%d/%b/%Y:%H:%M:%S %z").to_string()
}

/// Fresh request identifier.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Token following `Bearer ` in an authorization header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    (scheme == "Bearer" && !token.is_empty()).then_some(token)
}

/// Decode JWT claims without verifying the signature. Undecodable tokens
/// yield `None`.
pub fn decode_claims(token: &str) -> Option<Value> {
    match jsonwebtoken::dangerous::insecure_decode::<Value>(token) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "Bearer token is not a decodable JWT");
            None
        }
    }
}

/// Claims from the request's `Authorization: Bearer` header, if decodable.
pub fn bearer_claims(request: &RequestSnapshot) -> Option<Value> {
    request
        .header("authorization")
        .and_then(bearer_token)
        .and_then(decode_claims)
}

/// Scopes from the space separated `scope` claim.
pub fn claim_scopes(claims: &Value) -> Option<Vec<String>> {
    claims
        .get("scope")
        .and_then(Value::as_str)
        .map(|s| s.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
}
