//! Open WebSocket connections and their cached credentials.
//!
//! # Design Decisions
//! - Each connection owns an unbounded outbound queue drained by its socket
//!   task, so `@connections` sends never touch the socket directly
//! - Registry and credential cache are keyed by connection id; entries of
//!   different connections never contend

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::events::websocket::ConnectionAuth;

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Code sent when a timeout ends the connection.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frame queued for a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Close { code: u16, reason: String },
}

/// One connected client.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub connected_at: i64,
    pub source_ip: String,
    pub user_agent: String,
    last_active_at: AtomicI64,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        connected_at: i64,
        source_ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            id: id.into(),
            connected_at,
            source_ip: source_ip.into(),
            user_agent: user_agent.into(),
            last_active_at: AtomicI64::new(connected_at),
            sender,
        };
        (connection, receiver)
    }

    pub fn last_active_at(&self) -> i64 {
        self.last_active_at.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_active_at
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Queue a frame; false once the socket task is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// `GET @connections/{id}` body.
    pub fn describe(&self) -> Value {
        json!({
            "connectedAt": self.connected_at,
            "identity": {
                "sourceIp": self.source_ip,
                "userAgent": self.user_agent,
            },
            "lastActiveAt": self.last_active_at(),
        })
    }
}

/// Connections and the credentials cached at `$connect`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: DashMap<String, Arc<Connection>>,
    auth: DashMap<String, ConnectionAuth>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.clients.insert(connection.id.clone(), connection);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.clients.remove(id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send a data frame to a connection; false when it is unknown.
    pub fn send(&self, id: &str, frame: Outbound) -> bool {
        match self.get(id) {
            Some(connection) => {
                connection.touch();
                connection.send(frame)
            }
            None => false,
        }
    }

    /// Ask a connection to close; false when it is unknown.
    pub fn close(&self, id: &str) -> bool {
        self.get(id).is_some_and(|connection| {
            connection.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: String::new(),
            })
        })
    }

    pub fn cache_auth(&self, id: &str, auth: ConnectionAuth) {
        self.auth.insert(id.to_string(), auth);
    }

    pub fn auth(&self, id: &str) -> Option<ConnectionAuth> {
        self.auth.get(id).map(|a| a.value().clone())
    }

    pub fn forget_auth(&self, id: &str) {
        self.auth.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_close() {
        let registry = ConnectionRegistry::new();
        let (connection, mut receiver) = Connection::new("c1", 10, "127.0.0.1", "ua");
        registry.insert(Arc::new(connection));

        assert!(registry.send("c1", Outbound::Text("hi".into())));
        assert!(!registry.send("missing", Outbound::Text("hi".into())));
        assert!(registry.close("c1"));
        assert_eq!(receiver.try_recv().unwrap(), Outbound::Text("hi".into()));
        assert_eq!(
            receiver.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_NORMAL,
                reason: String::new()
            }
        );

        assert!(registry.get("c1").unwrap().last_active_at() >= 10);
        registry.remove("c1");
        assert!(registry.is_empty());
        assert!(!registry.close("c1"));
    }

    #[test]
    fn test_auth_cache() {
        let registry = ConnectionRegistry::new();
        let mut auth = ConnectionAuth::default();
        auth.authorizer.insert("principalId".into(), json!("u"));
        registry.cache_auth("c1", auth.clone());
        assert_eq!(registry.auth("c1"), Some(auth));
        registry.forget_auth("c1");
        assert_eq!(registry.auth("c1"), None);
    }

    #[test]
    fn test_describe() {
        let (connection, _receiver) = Connection::new("c1", 10, "10.0.0.1", "ua");
        let description = connection.describe();
        assert_eq!(description["connectedAt"], 10);
        assert_eq!(description["lastActiveAt"], 10);
        assert_eq!(description["identity"]["sourceIp"], "10.0.0.1");
    }
}
