//! End-to-end WebSocket tests.

use std::time::Duration;

use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use apigw_offline::invoke::InvocationError;
use apigw_offline::lifecycle::Gateway;

mod common;

const CONFIG: &str = r#"
[authorizers.query]
type = "request"
function = "authorizer"

[websocket]
enabled = true

[[websocket.routes]]
route = "$connect"
function = "connect"
authorizer = "query"

[[websocket.routes]]
route = "$disconnect"
function = "disconnect"

[[websocket.routes]]
route = "echo"
function = "echo"
route_response_selection_expression = "$default"

[[websocket.routes]]
route = "$default"
function = "fallback"
"#;

fn respond(function: &str, event: &Value) -> Result<Value, InvocationError> {
    match function {
        "authorizer" => match event["queryStringParameters"]["token"].as_str() {
            Some("good") => Ok(json!({
                "principalId": "user-1",
                "policyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{"Action": "execute-api:Invoke", "Effect": "Allow", "Resource": event["methodArn"]}]
                },
                "context": {"tier": "gold"}
            })),
            _ => Ok(json!("Unauthorized")),
        },
        "connect" | "disconnect" => Ok(json!({"statusCode": 200})),
        "echo" => Ok(json!({"statusCode": 200, "body": event["body"]})),
        _ => Err(InvocationError::new("Error", "no handler")),
    }
}

fn ws_url(gateway: &Gateway, query: &str) -> String {
    format!("ws://{}/?{query}", gateway.websocket_addr.unwrap())
}

fn connection_id(invoker: &common::ScriptedInvoker) -> String {
    invoker.events_for("connect")[0]["requestContext"]["connectionId"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn next_text<S>(stream: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    message.to_text().unwrap().to_string()
}

#[tokio::test]
async fn test_message_routing_and_disconnect() {
    let invoker = common::ScriptedInvoker::new(respond);
    let gateway = common::start_gateway(CONFIG, invoker.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url(&gateway, "token=good")).await.unwrap();
    let id = connection_id(&invoker);

    let connect = &invoker.events_for("connect")[0];
    assert_eq!(connect["requestContext"]["eventType"], "CONNECT");
    assert_eq!(connect["requestContext"]["authorizer"]["principalId"], "user-1");
    assert_eq!(connect["requestContext"]["authorizer"]["tier"], "gold");

    socket.send(Message::text(r#"{"action":"echo","n":1}"#)).await.unwrap();
    assert_eq!(next_text(&mut socket).await, r#"{"action":"echo","n":1}"#);

    socket.send(Message::text("not json")).await.unwrap();
    let error: Value = serde_json::from_str(&next_text(&mut socket).await).unwrap();
    assert_eq!(error["connectionId"], id.as_str());
    assert_eq!(error["message"], "Internal server error");

    let message = &invoker.events_for("echo")[0];
    assert_eq!(message["requestContext"]["eventType"], "MESSAGE");
    assert_eq!(message["requestContext"]["routeKey"], "echo");
    assert_eq!(message["requestContext"]["authorizer"]["principalId"], "user-1");

    socket.close(None).await.unwrap();
    assert!(common::eventually(|| !invoker.events_for("disconnect").is_empty()).await);
    let disconnect = &invoker.events_for("disconnect")[0];
    assert_eq!(disconnect["requestContext"]["eventType"], "DISCONNECT");
    assert_eq!(disconnect["requestContext"]["connectionId"], id.as_str());
    assert_eq!(disconnect["requestContext"]["authorizer"]["principalId"], "user-1");

    let registry = gateway.websocket.as_ref().unwrap().registry();
    assert!(common::eventually(|| registry.auth(&id).is_none()).await);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_connections_api() {
    let invoker = common::ScriptedInvoker::new(respond);
    let gateway = common::start_gateway(CONFIG, invoker.clone()).await;
    let client = common::client();

    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url(&gateway, "token=good")).await.unwrap();
    let id = connection_id(&invoker);
    let registry = gateway.websocket.as_ref().unwrap().registry();
    assert!(common::eventually(|| registry.get(&id).is_some()).await);

    let url = format!("http://{}/@connections/{id}", gateway.websocket_addr.unwrap());

    let response = client.post(&url).body("pushed").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(next_text(&mut socket).await, "pushed");

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info: Value = response.json().await.unwrap();
    assert!(info["connectedAt"].as_i64().unwrap() > 0);
    assert!(info["lastActiveAt"].as_i64().unwrap() >= info["connectedAt"].as_i64().unwrap());
    assert_eq!(info["identity"]["sourceIp"], "127.0.0.1");

    let response = client.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let closed = tokio::time::timeout(Duration::from_secs(2), socket.next()).await.unwrap();
    assert!(matches!(closed, Some(Ok(Message::Close(_))) | None));

    assert!(common::eventually(|| registry.get(&id).is_none()).await);
    let response = client.post(&url).body("late").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let response = client.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_connect_rejected_by_authorizer() {
    let invoker = common::ScriptedInvoker::new(respond);
    let gateway = common::start_gateway(CONFIG, invoker.clone()).await;

    let err = tokio_tungstenite::connect_async(ws_url(&gateway, "token=bad")).await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("unexpected error: {other}"),
    }
    assert!(invoker.events_for("connect").is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_handshake_leaves_no_credentials() {
    let invoker = common::ScriptedInvoker::new(respond);
    let gateway = common::start_gateway(CONFIG, invoker.clone()).await;
    let addr = gateway.websocket_addr.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /?token=good HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    assert!(common::eventually(|| !invoker.events_for("connect").is_empty()).await);
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let id = connection_id(&invoker);
    let registry = gateway.websocket.as_ref().unwrap().registry();
    assert!(common::eventually(|| registry.is_empty() && registry.auth(&id).is_none()).await);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_connect_requires_connect_route() {
    let invoker = common::ScriptedInvoker::new(respond);
    let gateway = common::start_gateway("[websocket]\nenabled = true\n", invoker).await;

    let err = tokio_tungstenite::connect_async(ws_url(&gateway, "")).await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 502),
        other => panic!("unexpected error: {other}"),
    }

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_idle_timeout_closes_with_going_away() {
    let invoker = common::ScriptedInvoker::new(respond);
    let config = CONFIG.replace("enabled = true", "enabled = true\nidle_timeout_secs = 1");
    let gateway = common::start_gateway(&config, invoker.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url(&gateway, "token=good")).await.unwrap();
    let message = tokio::time::timeout(Duration::from_secs(3), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1001);
            assert_eq!(frame.reason.as_str(), "Going away");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(common::eventually(|| !invoker.events_for("disconnect").is_empty()).await);

    gateway.shutdown().await;
}
