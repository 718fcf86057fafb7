//! Response mapping subsystem.
//!
//! # Data Flow
//! ```text
//! Result<Value, InvocationError> + RouteMatch
//!     → mapper.rs (status derivation, response selection, proxy contract)
//!     → envelope.rs (ResponseEnvelope: status, headers, cookies, body)
//!     → http layer (CORS decoration, Set-Cookie, axum Response)
//! ```
//!
//! # Design Decisions
//! - The envelope keeps headers as an ordered list so multi-value headers
//!   survive until the wire
//! - Cookies stay separate from headers until the transport decides whether
//!   to mark them `Secure; HttpOnly`

pub mod envelope;
pub mod mapper;

pub use envelope::{ResponseBody, ResponseEnvelope};
pub use mapper::{error_status, map_response, MappingError, MappingInput};
