//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build dispatcher/servers → Bind listeners → Spawn
//!
//! Shutdown (shutdown.rs):
//!     Trigger → listeners stop accepting → tasks joined
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, Gateway, StartupError};
