//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! bind address (config)
//!     → listener.rs (parse, bind, fail fast)
//!     → tls.rs (optional certificate for the HTTP listener)
//!     → Hand off to the HTTP and WebSocket servers
//! ```

pub mod listener;
pub mod tls;

pub use listener::{bind, ListenerError};
pub use tls::load_tls_config;
