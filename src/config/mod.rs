//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → CLI overrides applied in main.rs
//!     → route table, authorizers and listeners built once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApiKind, AuthorizerConfig, AuthorizerKind, FunctionConfig, GatewayConfig, GatewaySettings,
    HttpApiCorsConfig, IntegrationStyle, JwtKeyConfig, ListenerConfig, ObservabilityConfig,
    ResponseConfig, ResponseMappingConfig, RouteConfig, RouteCorsConfig, WebSocketConfig,
    WebSocketRouteConfig,
};
