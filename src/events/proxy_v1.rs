//! Proxy integration events, payload format 1.0.

use serde::Serialize;
use serde_json::{Map, Value};

use super::identity::{bearer_claims, claim_scopes, new_request_id, request_identity, request_time};
use super::overrides::sentinel;
use super::snapshot::{path_parameters_value, RequestSnapshot};
use super::{credentials_authorizer, EventInput, SynthesisError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEventV1 {
    pub body: Option<String>,
    pub headers: Map<String, Value>,
    pub http_method: String,
    pub is_base64_encoded: bool,
    pub multi_value_headers: Map<String, Value>,
    pub multi_value_query_string_parameters: Option<Map<String, Value>>,
    pub path: String,
    pub path_parameters: Value,
    pub query_string_parameters: Option<Map<String, Value>>,
    pub request_context: RequestContextV1,
    pub resource: String,
    pub stage_variables: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextV1 {
    pub account_id: String,
    pub api_id: String,
    pub authorizer: Map<String, Value>,
    pub domain_name: String,
    pub domain_prefix: String,
    pub extended_request_id: String,
    pub http_method: String,
    pub identity: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub path: String,
    pub protocol: String,
    pub request_id: String,
    pub request_time: String,
    pub request_time_epoch: i64,
    pub resource_id: String,
    pub resource_path: String,
    pub stage: String,
}

/// Add `Content-Length` and a default `Content-Type` to event headers when
/// the request has a body and did not send them.
pub(crate) fn add_body_headers(
    headers: &mut Map<String, Value>,
    request: &RequestSnapshot,
    length_name: &str,
    type_name: &str,
) {
    if request.body.is_empty() {
        return;
    }
    let has = |headers: &Map<String, Value>, name: &str| headers.keys().any(|k| k.eq_ignore_ascii_case(name));
    if !has(headers, "content-length") {
        headers.insert(length_name.into(), Value::String(request.body.len().to_string()));
    }
    if !has(headers, "content-type") {
        headers.insert(type_name.into(), Value::String("application/json".into()));
    }
}

/// Build a payload 1.0 proxy event.
pub fn create(input: &EventInput<'_>) -> Result<Value, SynthesisError> {
    let request = input.request;
    let route = &input.route.route;
    let stage = input.stage;

    let mut headers = request.single_value_headers();
    add_body_headers(&mut headers, request, "Content-Length", "Content-Type");
    let (body, is_base64_encoded) = request.event_body();

    let authorizer = match &stage.overrides.authorizer {
        Some(map) => map.clone(),
        None => {
            let mut authorizer = credentials_authorizer(input.credentials);
            let claims = input
                .credentials
                .and_then(|c| c.claims.clone())
                .or_else(|| bearer_claims(request));
            if let Some(claims) = claims {
                let scopes = input
                    .credentials
                    .and_then(|c| c.scopes.clone())
                    .or_else(|| claim_scopes(&claims));
                if let Some(scopes) = scopes {
                    authorizer.insert("scopes".into(), scopes.into());
                }
                authorizer.insert("claims".into(), claims);
            }
            let principal_id = input
                .credentials
                .and_then(|c| c.principal_id.clone())
                .unwrap_or_else(|| stage.default_principal_id());
            authorizer.insert("principalId".into(), Value::String(principal_id));
            authorizer
        }
    };

    let http_method = request.method.as_str().to_string();
    let event = ProxyEventV1 {
        body,
        headers,
        http_method: http_method.clone(),
        is_base64_encoded,
        multi_value_headers: request.multi_value_headers(),
        multi_value_query_string_parameters: request.multi_value_query(),
        path: input.route.request_path.clone(),
        path_parameters: path_parameters_value(&input.route.path_parameters),
        query_string_parameters: request.single_value_query(),
        request_context: RequestContextV1 {
            account_id: stage
                .overrides
                .account_id
                .clone()
                .unwrap_or_else(|| sentinel::ACCOUNT_ID.to_string()),
            api_id: sentinel::API_ID.to_string(),
            authorizer,
            domain_name: sentinel::DOMAIN_NAME.to_string(),
            domain_prefix: sentinel::DOMAIN_PREFIX.to_string(),
            extended_request_id: new_request_id(),
            http_method,
            identity: request_identity(request, &stage.overrides),
            operation_name: route.operation_name.clone(),
            path: input.route.request_path.clone(),
            protocol: "HTTP/1.1".to_string(),
            request_id: new_request_id(),
            request_time: request_time(request.received_at),
            request_time_epoch: request.epoch_millis(),
            resource_id: sentinel::RESOURCE_ID.to_string(),
            resource_path: route.resource_path().to_string(),
            stage: route.event_stage(stage).to_string(),
        },
        resource: route.event_resource().to_string(),
        stage_variables: stage.variables_value(),
    };
    Ok(serde_json::to_value(event)?)
}
