//! Mapping template context.
//!
//! # Responsibilities
//! - Build the `$context`, `$input`, `$util` and `$stageVariables`
//!   namespaces templates are rendered against
//! - Evaluate the JSONPath subset templates and response parameters use
//!
//! # Design Decisions
//! - The context is a plain value built once per render; nothing is shared
//!   between requests
//! - Identity and authorizer data come from the same helpers as proxy
//!   events so both integration styles report identical values

pub mod context;
pub mod json_path;
pub mod util;

pub use context::{MappingContext, MappingContextBuilder};
