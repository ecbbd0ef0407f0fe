use crate::error::Error;

/// Result alias used across every quiver crate.
pub type Result<T> = std::result::Result<T, Error>;
