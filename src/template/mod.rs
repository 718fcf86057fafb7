//! Mapping template engine.
//!
//! # Data Flow
//! ```text
//! template source
//!     → parser.rs (text, references, directives → Node tree)
//!     → render.rs (evaluate against a TemplateContext)
//!     → String output
//!
//! JSON template documents:
//!     object.rs walks the tree and renders each string leaf,
//!     coercing the output back into JSON values
//! ```
//!
//! # Design Decisions
//! - Undefined references are a no-op: they render as their own source text
//!   (`$!quiet` references render nothing)
//! - Namespace objects such as `$input` and `$util` are supplied by the caller
//!   through `TemplateContext::call`, so the engine stays free of gateway types
//! - Pure: no I/O, no global state; each render owns its variables

pub mod ast;
mod methods;
pub mod object;
pub mod parser;
pub mod render;

use serde_json::{Map, Value};
use thiserror::Error;

pub use object::{render_template_object, render_template_source, MAX_DEPTH};
pub use render::stringify;

/// Errors raised while parsing or rendering a template.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("template syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("template nesting exceeds {0} levels")]
    DepthExceeded(usize),

    #[error("{name} failed: {message}")]
    Function { name: String, message: String },

    #[error("template evaluation failed: {0}")]
    Evaluation(String),
}

/// Variables and namespace objects visible to a template.
pub trait TemplateContext {
    /// Resolve a top-level reference such as `$context` or `$stageVariables`.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Call `$namespace.method(args)`. `None` means the namespace does not
    /// provide the method and the call falls back to built-in methods on the
    /// looked-up value.
    fn call(
        &self,
        _namespace: &str,
        _method: &str,
        _args: &[Value],
    ) -> Option<Result<Value, TemplateError>> {
        None
    }
}

impl TemplateContext for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Render template source against a context.
pub fn render(source: &str, context: &dyn TemplateContext) -> Result<String, TemplateError> {
    let nodes = parser::parse(source)?;
    render::Renderer::new(context).render_to_string(&nodes)
}
