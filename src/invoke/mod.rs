//! Function invocation boundary.
//!
//! # Data Flow
//! ```text
//! Synthesized event (handler / authorizer / websocket)
//!     → Dispatcher::invoke (request id, per-function environment, timeout)
//!     → Invoker::invoke (HttpInvoker or an in-process implementation)
//!     → InvocationOutput { result } | InvocationError
//! ```
//!
//! # Design Decisions
//! - The gateway never runs function code itself; everything goes through
//!   the `Invoker` trait so tests can script results
//! - Per-invocation environment is passed explicitly instead of mutating
//!   the process environment
//! - Timeouts are the invoker's concern and surface as ordinary errors

pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::FunctionConfig;
use crate::events::identity::new_request_id;
use crate::observability::metrics;

pub use self::http::HttpInvoker;

/// One call of a function.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub event: Value,
    pub request_id: String,
    pub environment: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Successful function result. `Value::Null` stands for "no result".
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub result: Value,
    pub execution_time: Duration,
}

/// Error raised by the function or by the invocation itself.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct InvocationError {
    pub message: String,
    pub error_type: String,
    pub stack_trace: Vec<String>,
}

impl InvocationError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            stack_trace: Vec::new(),
        }
    }

    /// Read a Lambda style `{errorMessage, errorType, stackTrace}` payload.
    pub fn from_payload(payload: &Value) -> Self {
        let message = match payload.get("errorMessage") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };
        Self {
            message,
            error_type: payload
                .get("errorType")
                .and_then(Value::as_str)
                .unwrap_or("Error")
                .to_string(),
            stack_trace: payload
                .get("stackTrace")
                .and_then(Value::as_array)
                .map(|lines| {
                    lines
                        .iter()
                        .map(|l| l.as_str().map(str::to_string).unwrap_or_else(|| l.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// `{errorMessage, errorType, stackTrace}` body.
    pub fn to_payload(&self) -> Value {
        json!({
            "errorMessage": self.message,
            "errorType": self.error_type,
            "stackTrace": self.stack_trace,
        })
    }
}

/// Runs functions on behalf of the gateway.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, function: &str, invocation: Invocation) -> Result<InvocationOutput, InvocationError>;
}

/// Wraps an [`Invoker`] with per-function settings and bookkeeping.
#[derive(Clone)]
pub struct Dispatcher {
    invoker: Arc<dyn Invoker>,
    functions: Arc<BTreeMap<String, FunctionConfig>>,
    default_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        invoker: Arc<dyn Invoker>,
        functions: BTreeMap<String, FunctionConfig>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            functions: Arc::new(functions),
            default_timeout,
        }
    }

    /// Invoke `function` with `event`.
    pub async fn invoke(&self, function: &str, event: Value) -> Result<InvocationOutput, InvocationError> {
        let config = self.functions.get(function);
        let request_id = new_request_id();
        let invocation = Invocation {
            event,
            request_id: request_id.clone(),
            environment: config.map(|c| c.environment.clone()).unwrap_or_default(),
            timeout: Some(
                config
                    .and_then(|c| c.timeout_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_timeout),
            )
            .filter(|timeout| !timeout.is_zero()),
        };

        tracing::debug!(function = %function, request_id = %request_id, "Invoking function");
        let started = Instant::now();
        let result = self.invoker.invoke(function, invocation).await;
        let elapsed = started.elapsed();
        metrics::record_invocation(function, result.is_ok(), elapsed);

        match &result {
            Ok(output) => {
                let duration_ms = output.execution_time.as_secs_f64() * 1000.0;
                tracing::info!(
                    function = %function,
                    request_id = %request_id,
                    duration_ms,
                    billed_ms = duration_ms.ceil() as u64,
                    "Invocation finished"
                );
            }
            Err(e) => {
                tracing::warn!(
                    function = %function,
                    request_id = %request_id,
                    error_type = %e.error_type,
                    error = %e,
                    "Invocation failed"
                );
            }
        }
        result
    }
}
