//! Typed compile errors
//!
//! Replaces generic `Result<T, String>` with a typed error enum so callers
//! can distinguish invariant violations from malformed input.

use std::error::Error as StdError;
use std::fmt;

/// Errors produced by the middle-end.
///
/// A compile is never retried and never yields partial output: the first
/// error abandons the function and propagates to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// An internal invariant of the SSA graph, the dominator computation or
    /// the allocator failed to hold.
    Internal { message: String },

    /// The AST had a shape the builder does not accept (e.g. an assignment
    /// whose target is a literal).
    UnexpectedAst { message: String },

    // Generic fallback
    Generic { message: String },
}

impl CompileError {
    /// Create an internal invariant error
    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }

    /// Create an unexpected-AST error
    pub fn unexpected_ast(message: impl Into<String>) -> Self {
        CompileError::UnexpectedAst {
            message: message.into(),
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> String {
        match self {
            CompileError::Internal { message } => {
                format!("Internal compiler error: {}", message)
            }
            CompileError::UnexpectedAst { message } => {
                format!("Unexpected AST shape: {}", message)
            }
            CompileError::Generic { message } => format!("Compile error: {}", message),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl StdError for CompileError {}

impl From<CompileError> for String {
    fn from(err: CompileError) -> String {
        err.description()
    }
}

impl From<String> for CompileError {
    fn from(msg: String) -> Self {
        CompileError::Generic { message: msg }
    }
}

impl From<&str> for CompileError {
    fn from(msg: &str) -> Self {
        CompileError::Generic {
            message: msg.to_string(),
        }
    }
}
