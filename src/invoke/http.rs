//! Invoker speaking the Lambda Invoke API over HTTP.
//!
//! `POST {endpoint}/2015-03-31/functions/{name}/invocations` with the event
//! as the body. The per-invocation environment travels base64 encoded in the
//! `X-Amz-Client-Context` header; function errors are flagged by the
//! `X-Amz-Function-Error` response header.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use super::{Invocation, InvocationError, InvocationOutput, Invoker};

/// Lambda Invoke API client.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInvoker {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, function: &str) -> String {
        format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.endpoint,
            urlencoding::encode(function)
        )
    }
}

fn client_context(invocation: &Invocation) -> String {
    let context = json!({
        "custom": { "requestId": invocation.request_id },
        "env": invocation.environment,
    });
    STANDARD.encode(context.to_string())
}

fn parse_payload(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, function: &str, invocation: Invocation) -> Result<InvocationOutput, InvocationError> {
        let started = Instant::now();
        let mut request = self
            .client
            .post(self.url(function))
            .header("X-Amz-Invocation-Type", "RequestResponse")
            .header("X-Amz-Client-Context", client_context(&invocation))
            .json(&invocation.event);
        if let Some(timeout) = invocation.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| transport_error(e, invocation.timeout))?;
        let status = response.status();
        let function_error = response.headers().contains_key("x-amz-function-error");
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, invocation.timeout))?;
        let payload = parse_payload(&bytes);

        if function_error {
            return Err(InvocationError::from_payload(&payload));
        }
        if !status.is_success() {
            let detail = payload
                .get("message")
                .or_else(|| payload.get("Message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Invoke API returned {status}"));
            return Err(InvocationError::new("ServiceException", detail));
        }

        Ok(InvocationOutput {
            result: payload,
            execution_time: started.elapsed(),
        })
    }
}

fn transport_error(error: reqwest::Error, timeout: Option<Duration>) -> InvocationError {
    if error.is_timeout() {
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
        return InvocationError::new("TimeoutError", format!("Task timed out after {secs:.2} seconds"));
    }
    InvocationError::new("InvokeError", error.to_string())
}
