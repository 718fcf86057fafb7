//! Shared utilities for integration tests.
//!
//! Boots the whole gateway on ephemeral ports with an in-process invoker
//! answering from a closure.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use apigw_offline::config::loader::parse_config;
use apigw_offline::events::EnvironmentOverrides;
use apigw_offline::invoke::{Invocation, InvocationError, InvocationOutput, Invoker};
use apigw_offline::lifecycle::{start, Gateway};

type Respond = dyn Fn(&str, &Value) -> Result<Value, InvocationError> + Send + Sync;

/// Invoker answering from a closure and recording each call.
pub struct ScriptedInvoker {
    respond: Box<Respond>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedInvoker {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Events received so far, with the function they were sent to.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Events sent to `function`.
    pub fn events_for(&self, function: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(f, _)| f == function)
            .map(|(_, event)| event)
            .collect()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, function: &str, invocation: Invocation) -> Result<InvocationOutput, InvocationError> {
        let result = (self.respond)(function, &invocation.event);
        self.calls
            .lock()
            .unwrap()
            .push((function.to_string(), invocation.event));
        result.map(|result| InvocationOutput {
            result,
            execution_time: Duration::from_millis(1),
        })
    }
}

/// Start a gateway from TOML, forcing both listeners onto ephemeral ports.
pub async fn start_gateway(toml: &str, invoker: Arc<ScriptedInvoker>) -> Gateway {
    let mut config = parse_config(toml).unwrap();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.websocket.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    start(&config, invoker, EnvironmentOverrides::default()).await.unwrap()
}

/// Client that never goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
