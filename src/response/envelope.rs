//! Wire response assembled by the mapper.

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderName, HeaderValue, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

/// Response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
}

/// Status, ordered multi-value headers, cookies and body of a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    /// Header names as the function or configuration spelled them.
    pub headers: Vec<(String, String)>,
    /// `(name, value)` cookie pairs.
    pub cookies: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// JSON reply with `Content-Type: application/json`.
    pub fn json(status: StatusCode, body: &Value) -> Self {
        let mut envelope = Self::new(status);
        envelope.append_header("Content-Type", "application/json");
        envelope.body = ResponseBody::Text(body.to_string());
        envelope
    }

    /// Error reply in the emulator's own error shape.
    pub fn gateway_error(status: StatusCode, message: &str, error_type: &str, stack_trace: &[String]) -> Self {
        Self::json(
            status,
            &json!({
                "errorMessage": message,
                "errorType": error_type,
                "offlineInfo": "If you believe this is an issue with the gateway emulator, please report it.",
                "stackTrace": stack_trace,
            }),
        )
    }

    /// Last value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replace every value of a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn set_header_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if !self.has_header(name) {
            self.headers.push((name.to_string(), value.into()));
        }
    }

    /// Parse a `name=value` cookie string; the value may contain `=`.
    pub fn add_cookie(&mut self, cookie: &str) {
        let (name, value) = cookie.split_once('=').unwrap_or((cookie, ""));
        self.cookies.push((name.trim().to_string(), value.to_string()));
    }

    /// Convert into an axum response. Invalid header names or values are
    /// logged and dropped.
    pub fn into_http(self, secure_cookies: bool) -> Response {
        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Text(text) => Body::from(text),
            ResponseBody::Binary(bytes) => Body::from(bytes),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        let headers = response.headers_mut();

        for (name, value) in &self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(header = %name, "Dropping invalid response header"),
            }
        }

        for (name, value) in &self.cookies {
            let mut cookie = format!("{name}={value}");
            if secure_cookies {
                cookie.push_str("; Secure; HttpOnly");
            }
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => tracing::warn!(cookie = %name, "Dropping invalid cookie"),
            }
        }
        response
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        self.into_http(false)
    }
}
