//! Captured inbound request.
//!
//! # Responsibilities
//! - Hold everything event synthesis needs from the wire request
//! - Preserve header order and duplicates exactly as received
//! - Offer the single-value (last wins) and multi-value (all, in order)
//!   views the gateway events expose
//!
//! # Design Decisions
//! - The body is kept as raw bytes; events decide how to present it
//! - Snapshots are cheap to clone (`Bytes` body) so the replay slot can
//!   keep one without copying the payload

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// An inbound request as received by the gateway listener.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    /// Path as received, including any stage prefix.
    pub path: String,
    /// Query string without the leading `?`, verbatim.
    pub raw_query: String,
    /// Header names and values in arrival order, duplicates preserved.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source_ip: String,
    pub received_at: DateTime<Utc>,
}

impl RequestSnapshot {
    /// Build a snapshot from request parts.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        raw_query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
        client: SocketAddr,
    ) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            method,
            path: path.into(),
            raw_query: raw_query.unwrap_or_default().to_string(),
            headers,
            body,
            source_ip: client.ip().to_string(),
            received_at: Utc::now(),
        }
    }

    /// Last value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Header map where the last duplicate wins.
    pub fn single_value_headers(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        map
    }

    /// Header map holding every value in arrival order.
    pub fn multi_value_headers(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            let entry = map
                .entry(name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(values) = entry {
                values.push(Value::String(value.clone()));
            }
        }
        map
    }

    /// Lower-cased header map with duplicates comma-joined.
    pub fn joined_headers(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            let key = name.to_ascii_lowercase();
            match map.get_mut(&key) {
                Some(Value::String(existing)) => {
                    existing.push(',');
                    existing.push_str(value);
                }
                _ => {
                    map.insert(key, Value::String(value.clone()));
                }
            }
        }
        map
    }

    /// Decoded query parameters in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.raw_query.as_bytes())
            .into_owned()
            .collect()
    }

    /// Query parameters where the last duplicate wins, `None` when empty.
    pub fn single_value_query(&self) -> Option<Map<String, Value>> {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return None;
        }
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert(key, Value::String(value));
        }
        Some(map)
    }

    /// Query parameters with all values, `None` when empty.
    pub fn multi_value_query(&self) -> Option<Map<String, Value>> {
        let grouped = self.grouped_query();
        if grouped.is_empty() {
            return None;
        }
        Some(
            grouped
                .into_iter()
                .map(|(k, values)| (k, Value::Array(values.into_iter().map(Value::String).collect())))
                .collect(),
        )
    }

    /// Query parameters with duplicates comma-joined, `None` when empty.
    pub fn joined_query(&self) -> Option<Map<String, Value>> {
        let grouped = self.grouped_query();
        if grouped.is_empty() {
            return None;
        }
        Some(
            grouped
                .into_iter()
                .map(|(k, values)| (k, Value::String(values.join(","))))
                .collect(),
        )
    }

    fn grouped_query(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in self.query_pairs() {
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key, vec![value])),
            }
        }
        grouped
    }

    /// Body for proxy events: the exact text, base64 for non UTF-8 payloads,
    /// `None` when empty. The flag reports base64 encoding.
    pub fn event_body(&self) -> (Option<String>, bool) {
        if self.body.is_empty() {
            return (None, false);
        }
        match std::str::from_utf8(&self.body) {
            Ok(text) => (Some(text.to_string()), false),
            Err(_) => {
                use base64::Engine as _;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.body);
                (Some(encoded), true)
            }
        }
    }

    /// Media type of the request without parameters, lower-cased.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Cookies as `name=value` strings from every `Cookie` header.
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, v)| v.split(';'))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Epoch milliseconds the request was received at.
    pub fn epoch_millis(&self) -> i64 {
        self.received_at.timestamp_millis()
    }
}

/// Path parameters as an event map, `None` when empty.
pub fn path_parameters_value(params: &BTreeMap<String, String>) -> Value {
    if params.is_empty() {
        return Value::Null;
    }
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub fn snapshot(method: Method, path: &str, query: &str, headers: &[(&str, &str)], body: &str) -> RequestSnapshot {
        RequestSnapshot {
            method,
            path: path.to_string(),
            raw_query: query.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from(body.to_string()),
            source_ip: "127.0.0.1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_headers() {
        let req = snapshot(Method::GET, "/", "", &[("x-a", "1"), ("x-a", "2"), ("x-b", "3")], "");
        assert_eq!(req.single_value_headers()["x-a"], json!("2"));
        assert_eq!(req.multi_value_headers()["x-a"], json!(["1", "2"]));
        assert_eq!(req.header("X-A"), Some("2"));
    }

    #[test]
    fn test_query_views() {
        let req = snapshot(Method::GET, "/", "a=1&a=2&b=x%20y", &[], "");
        assert_eq!(req.single_value_query().unwrap()["a"], json!("2"));
        assert_eq!(req.multi_value_query().unwrap()["a"], json!(["1", "2"]));
        assert_eq!(req.joined_query().unwrap()["a"], json!("1,2"));
        assert_eq!(req.joined_query().unwrap()["b"], json!("x y"));

        let empty = snapshot(Method::GET, "/", "", &[], "");
        assert!(empty.single_value_query().is_none());
        assert!(empty.multi_value_query().is_none());
    }

    #[test]
    fn test_event_body() {
        assert_eq!(snapshot(Method::GET, "/", "", &[], "").event_body(), (None, false));
        assert_eq!(
            snapshot(Method::POST, "/", "", &[], "{\"a\":1}").event_body(),
            (Some("{\"a\":1}".to_string()), false)
        );
        let mut binary = snapshot(Method::POST, "/", "", &[], "");
        binary.body = Bytes::from_static(&[0xff, 0xfe]);
        assert_eq!(binary.event_body(), (Some("//4=".to_string()), true));
    }

    #[test]
    fn test_cookies_and_media_type() {
        let req = snapshot(
            Method::GET,
            "/",
            "",
            &[("cookie", "a=1; b=2"), ("content-type", "Application/JSON; charset=utf-8")],
            "",
        );
        assert_eq!(req.cookies(), vec!["a=1", "b=2"]);
        assert_eq!(req.media_type().as_deref(), Some("application/json"));
    }
}
