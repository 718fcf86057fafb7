//! Local API Gateway emulator library.

pub mod auth;
pub mod config;
pub mod events;
pub mod http;
pub mod invoke;
pub mod lifecycle;
pub mod mapping;
pub mod net;
pub mod observability;
pub mod response;
pub mod routing;
pub mod template;
pub mod websocket;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
