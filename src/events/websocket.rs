//! WebSocket API events.
//!
//! Every event carries a WebSocket request context. Connections accepted
//! through an authorizer additionally carry the cached identity and
//! authorizer maps.

use serde_json::{json, Map, Value};

use super::authorizer::ACCOUNT_ID;
use super::identity::{new_request_id, request_time};
use super::snapshot::RequestSnapshot;

pub const API_ID: &str = "private";
pub const STAGE: &str = "local";

/// Lifecycle phase reported as `requestContext.eventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Connect,
    Message,
    Disconnect,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Message => "MESSAGE",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

/// Identity and authorizer cached for a connection after `$connect`
/// authorization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionAuth {
    pub identity: Map<String, Value>,
    pub authorizer: Map<String, Value>,
}

/// `requestContext` for a WebSocket event.
pub fn request_context(event_type: EventType, route_key: &str, connection_id: &str, connected_at: i64) -> Value {
    let now = chrono::Utc::now();
    json!({
        "apiId": API_ID,
        "connectedAt": connected_at,
        "connectionId": connection_id,
        "domainName": "localhost",
        "eventType": event_type.as_str(),
        "extendedRequestId": new_request_id(),
        "identity": {
            "accessKey": null,
            "accountId": null,
            "caller": null,
            "cognitoAuthenticationProvider": null,
            "cognitoAuthenticationType": null,
            "cognitoIdentityId": null,
            "cognitoIdentityPoolId": null,
            "principalOrgId": null,
            "sourceIp": "127.0.0.1",
            "user": null,
            "userAgent": null,
            "userArn": null,
        },
        "messageDirection": "IN",
        "messageId": new_request_id(),
        "requestId": new_request_id(),
        "requestTime": request_time(now),
        "requestTimeEpoch": now.timestamp_millis(),
        "routeKey": route_key,
        "stage": STAGE,
    })
}

fn handshake_fields(request: &RequestSnapshot, event: &mut Map<String, Value>) {
    event.insert("headers".into(), Value::Object(request.single_value_headers()));
    event.insert("multiValueHeaders".into(), Value::Object(request.multi_value_headers()));
    if let Some(query) = request.multi_value_query() {
        event.insert("multiValueQueryStringParameters".into(), Value::Object(query));
    }
    if let Some(query) = request.single_value_query() {
        event.insert("queryStringParameters".into(), Value::Object(query));
    }
}

/// Event for the `$connect` route.
pub fn connect_event(request: &RequestSnapshot, connection_id: &str, connected_at: i64) -> Value {
    let mut event = Map::new();
    handshake_fields(request, &mut event);
    event.insert("isBase64Encoded".into(), Value::Bool(false));
    event.insert(
        "requestContext".into(),
        request_context(EventType::Connect, "$connect", connection_id, connected_at),
    );
    Value::Object(event)
}

/// `methodArn` presented to a `$connect` authorizer.
pub fn connect_method_arn(region: &str) -> String {
    format!("arn:aws:execute-api:{region}:{ACCOUNT_ID}:{API_ID}/{STAGE}/$connect")
}

/// REQUEST authorizer event for the `$connect` handshake.
pub fn authorizer_event(request: &RequestSnapshot, connection_id: &str, connected_at: i64, region: &str) -> Value {
    let mut event = Map::new();
    handshake_fields(request, &mut event);
    event.insert("methodArn".into(), Value::String(connect_method_arn(region)));
    event.insert(
        "requestContext".into(),
        request_context(EventType::Connect, "$connect", connection_id, connected_at),
    );
    event.insert("type".into(), Value::String("REQUEST".into()));
    Value::Object(event)
}

/// Event for a client message routed to `route_key`.
pub fn message_event(body: &str, route_key: &str, connection_id: &str, connected_at: i64) -> Value {
    json!({
        "body": body,
        "isBase64Encoded": false,
        "requestContext": request_context(EventType::Message, route_key, connection_id, connected_at),
    })
}

/// Event for the `$disconnect` route.
pub fn disconnect_event(connection_id: &str, connected_at: i64) -> Value {
    json!({
        "headers": {
            "Host": "localhost",
            "x-api-key": "",
            "x-restapi": "",
        },
        "isBase64Encoded": false,
        "multiValueHeaders": {
            "Host": ["localhost"],
            "x-api-key": [""],
            "x-restapi": [""],
        },
        "requestContext": request_context(EventType::Disconnect, "$disconnect", connection_id, connected_at),
    })
}

/// Merge cached connection credentials into an event's request context.
pub fn attach_auth(event: &mut Value, auth: &ConnectionAuth) {
    let Some(context) = event.get_mut("requestContext").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(identity) = context.get_mut("identity").and_then(Value::as_object_mut) {
        identity.extend(auth.identity.clone());
    }
    context.insert("authorizer".into(), Value::Object(auth.authorizer.clone()));
}
