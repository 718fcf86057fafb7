//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Merge the configured level with `RUST_LOG`
//!
//! # Design Decisions
//! - `RUST_LOG` wins over configuration when it is set
//! - JSON lines for machine consumption, the pretty fmt layer otherwise

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Default directives when neither `RUST_LOG` nor configuration say otherwise.
pub const DEFAULT_DIRECTIVES: &str = "apigw_offline=info,tower_http=info";

/// Filter directives for a configured level.
pub fn directives(level: &str) -> String {
    match level.trim() {
        "" | "info" => DEFAULT_DIRECTIVES.to_string(),
        level if level.contains('=') => level.to_string(),
        level => format!("apigw_offline={level},tower_http={level}"),
    }
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directives(&config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(directives("info"), DEFAULT_DIRECTIVES);
        assert_eq!(directives("debug"), "apigw_offline=debug,tower_http=debug");
        assert_eq!(directives("hyper=warn,apigw_offline=trace"), "hyper=warn,apigw_offline=trace");
    }
}
