//! Error types for pipesql.

use thiserror::Error;

/// The main error type for pipesql operations.
///
/// Lexing problems are normally reported in-band as an `Error` token; only
/// [`Compiler::compile_strict`](crate::Compiler::compile_strict) turns them
/// into [`PipeError::Lex`].
#[derive(Debug, Error)]
pub enum PipeError {
    /// Input did not lex cleanly.
    #[error("Lex error at position {position}: {message}")]
    Lex { position: usize, message: String },

    /// A dialect rule could not be built (bad regex).
    #[error("Invalid lexer rule: {0}")]
    Rule(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Enrichment lookup or persistence failed.
    #[error("Enrichment error: {0}")]
    Enrichment(String),

    /// An external call did not finish in time.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipeError {
    /// Create a lex error at the given position.
    pub fn lex(position: usize, message: impl Into<String>) -> Self {
        Self::Lex {
            position,
            message: message.into(),
        }
    }
}

impl From<regex::Error> for PipeError {
    fn from(err: regex::Error) -> Self {
        Self::Rule(err.to_string())
    }
}

/// Result type alias for pipesql operations.
pub type PipeResult<T> = Result<T, PipeError>;
