//! WebSocket API emulation.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → server.rs ($connect authorizer + handler decide the handshake)
//!     → connections.rs (registry entry, cached credentials)
//!     → messages routed by selection expression → Dispatcher
//!     → close / timeout → $disconnect → cache erased
//!
//! POST/DELETE/GET /@connections/{id} → connections.rs
//! ```

pub mod connections;
pub mod server;

pub use connections::{Connection, ConnectionRegistry, Outbound};
pub use server::{select_route, WebSocketServer, WsState};
