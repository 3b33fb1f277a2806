//! Code generation error type.
//!
//! Everything past semantic analysis runs on an accepted program, so
//! failures here are internal compiler errors: they abort with a
//! diagnostic and never silently produce wrong code.

use std::fmt;

#[derive(Debug)]
pub enum CodeGenError {
    /// Internal compiler error: malformed IR, unresolved name, bad
    /// descriptor offset; a compiler bug, not a user error.
    Ice(String),
    /// A formatting failure while writing assembly text.
    Format(fmt::Error),
}

impl CodeGenError {
    pub fn ice(msg: impl Into<String>) -> CodeGenError {
        CodeGenError::Ice(msg.into())
    }
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Ice(msg) => write!(f, "internal compiler error: {}", msg),
            CodeGenError::Format(e) => write!(f, "assembly emission error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}
