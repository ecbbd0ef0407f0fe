use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all quiver operations.
///
/// Errors propagate upward through the call stack using Rust's `?` operator.
/// The driver halts the running query on the first error and closes every
/// operator before surfacing it.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while opening or reading a data file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The SQL text could not be parsed into a statement.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid user input: unknown names, ambiguous columns, operand type
    /// mismatches, malformed records, out-of-range literals.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Catalog lookup failure: the table or column does not exist.
    #[error("{0}")]
    Catalog(String),

    /// A feature the engine recognizes but does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Internal error indicating a bug or a violated plan invariant.
    ///
    /// This must never occur for well-formed input; it is kept distinct from
    /// the user-error variants so callers can tell misuse from misbehavior.
    #[error("an internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create an [`Error::InvalidArgument`] from any displayable value.
    #[inline]
    pub fn invalid<E: fmt::Display>(err: E) -> Self {
        Error::InvalidArgument(err.to_string())
    }

    /// Create an [`Error::Unsupported`] from any displayable value.
    #[inline]
    pub fn unsupported<E: fmt::Display>(err: E) -> Self {
        Error::Unsupported(err.to_string())
    }

    /// Create an [`Error::Internal`] from any displayable value.
    #[inline]
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Error::Internal(err.to_string())
    }

    /// True when the error marks a bug rather than bad input.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}
