//! cellxp - a small Lisp-family interpreter
//!
//! This crate parses S-expressions into an expression tree and evaluates that tree
//! under a stack of lexical scopes. It supports closures, variadic procedures,
//! special forms with suppressed argument evaluation, and a fixed table of
//! primitive procedures operating on exact rationals.
//!
//! ```scheme
//! (+ 1/2 1/3)                         ; exact arithmetic => 5/6
//! (if (= 1 2) 10 20)                  ; only the taken branch is evaluated
//! ((lambda (a b) (+ a b)) 3 4)        ; closures => 7
//! ((. (lambda (x) (* x 2))
//!     (lambda (x) (+ x 1))) 3)        ; composition => 8
//! (let! 'x 5)                         ; bind in the innermost scope
//! ```
//!
//! ## Evaluation model
//!
//! Every value is a [`ast::Value`]. Lists are chains of cons cells ending in
//! `Null`, and text is a list of character codes. Procedures carry an arity and
//! an argument policy: ordinary procedures receive evaluated arguments, special
//! forms (`if`, `quote`, `lambda`, `lambda!`) receive the call-site expressions
//! untouched.
//!
//! The environment is an explicit stack of frames passed by `&mut` through every
//! evaluation step. Closures snapshot the stack when they are created and run their
//! body on top of that snapshot, so scoping is lexical. A closure call pushes
//! exactly one frame and pops it again before returning, on success and on failure.
//!
//! ## Modules
//!
//! - `ast`: expression model, string encoding and printing
//! - `scheme`: S-expression reader
//! - `evaluator`: environment stack, procedure protocol and evaluation
//! - `builtinops`: the primitive procedure table

use std::fmt;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum number of nested closure applications, `evaluate` calls and imports.
/// Recursion is the only way to iterate, so this bounds how long a list a
/// program can walk.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Reader failure (malformed syntax, trailing input, nesting too deep)
    ParseError(String),
    /// Runtime failure not covered by a more specific kind
    /// (division by zero, non-finite results, I/O, depth limit)
    EvalError(String),
    /// Atom lookup failed in every frame
    UnboundName(String),
    /// Call-site argument count disagrees with the callee's declared arity
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    /// A primitive received an argument of the wrong shape
    TypeMismatch(String),
    /// Malformed special-form syntax or improper list where a proper one was required
    InvalidForm(String),
    /// Binding requested with no frame on the stack
    EmptyStack,
    /// `let-parent!` used with fewer than two frames on the stack
    NoParentScope,
    /// Operator position evaluated to something other than a procedure
    NotCallable(String),
}

impl Error {
    pub fn arity_mismatch(name: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::ArityMismatch {
            name: name.into(),
            expected,
            got,
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Error::TypeMismatch(message.into())
    }

    pub fn invalid_form(message: impl Into<String>) -> Self {
        Error::InvalidForm(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(msg) => write!(f, "ParseError: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::UnboundName(name) => write!(f, "Unbound name: {name}"),
            Error::ArityMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "ArityError: {name} expected {expected} arguments, got {got}"
            ),
            Error::TypeMismatch(msg) => write!(f, "Type error: {msg}"),
            Error::InvalidForm(msg) => write!(f, "Invalid form: {msg}"),
            Error::EmptyStack => write!(f, "Scope error: no frame to bind into"),
            Error::NoParentScope => write!(f, "Scope error: no parent scope"),
            Error::NotCallable(value) => write!(f, "Not callable: {value}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod scheme;
