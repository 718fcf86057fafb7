//! Syntax tree produced by the template parser.

use serde_json::Value;

/// A node of template text.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal output.
    Text(String),
    /// `$name...` interpolated into the output.
    Reference(Reference),
    /// `#set($target = value)`.
    Set { target: Reference, value: Expr },
    /// `#if / #elseif / #else / #end`.
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    /// `#foreach($var in iterable) ... #end`.
    Foreach {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
    /// `#define($name) ... #end`.
    Define { name: String, body: Vec<Node> },
    /// `#break` leaves the innermost loop.
    Break,
    /// `#stop` ends rendering.
    Stop,
}

/// A variable reference such as `$!{input.params('id')}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// `$!` form renders nothing when undefined.
    pub quiet: bool,
    pub root: String,
    pub accessors: Vec<Accessor>,
    /// Exact source text, emitted when the reference is undefined.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Property(String),
    Method(String, Vec<Expr>),
    Index(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Double-quoted string with embedded references.
    Interpolated(Vec<Node>),
    Reference(Reference),
    List(Vec<Expr>),
    Range(Box<Expr>, Box<Expr>),
    Map(Vec<(Expr, Expr)>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}
