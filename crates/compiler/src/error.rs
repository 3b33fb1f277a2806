//! Top-level compile error type.
//!
//! Each stage has its own error enum; this wraps them so the driver can
//! propagate any stage failure with `?` and print one report. Compile-time
//! errors from the parser and semantic analyser arrive as collections; the
//! stages keep going to report everything they can.

use crate::codegen::CodeGenError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::semantic::SemanticError;
use std::fmt;

#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Parse(Vec<ParseError>),
    Semantic(Vec<SemanticError>),
    CodeGen(CodeGenError),
    Link(String),
    Io(std::io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "lex error: {}", e),
            CompileError::Parse(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "parse error: {}", e)?;
                }
                Ok(())
            }
            CompileError::Semantic(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "semantic error: {}", e)?;
                }
                Ok(())
            }
            CompileError::CodeGen(e) => write!(f, "{}", e),
            CompileError::Link(msg) => write!(f, "link error: {}", msg),
            CompileError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<Vec<ParseError>> for CompileError {
    fn from(errs: Vec<ParseError>) -> Self {
        CompileError::Parse(errs)
    }
}

impl From<Vec<SemanticError>> for CompileError {
    fn from(errs: Vec<SemanticError>) -> Self {
        CompileError::Semantic(errs)
    }
}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e)
    }
}
