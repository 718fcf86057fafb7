//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum setup, body limit, tracing)
//!     → handler.rs (snapshot, route, authorize, invoke, map)
//!     → api_key.rs / cors.rs (private routes, CORS headers)
//!     → Send to client
//! ```

pub mod api_key;
pub mod cors;
pub mod handler;
pub mod server;

pub use handler::{process, replay_last};
pub use server::{AppState, HttpServer};
