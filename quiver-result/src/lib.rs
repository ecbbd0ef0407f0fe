//! Error types and result definitions for the quiver query engine.
//!
//! All quiver crates share a single error enum ([`Error`]) and result alias
//! ([`Result<T>`]). Operations that can fail return `Result<T>` and propagate
//! failures with the `?` operator; at the CLI boundary errors are rendered as
//! user-facing messages.
//!
//! The enum keeps user errors (bad SQL, unknown names, type mismatches,
//! unsupported features, malformed input files) distinct from [`Error::Internal`],
//! which marks a violated plan invariant or a bug and must never be produced by
//! well-formed input.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
