//! Columnar data model for the quiver engine.
//!
//! The building blocks are:
//!
//! - [`LType`]: a logical type tag plus optional width/scale.
//! - [`Value`]: an immutable scalar tagged by its logical type.
//! - [`Vector`]: a column of values in flat, constant, or dictionary
//!   representation. Dictionary vectors share their base through an `Arc`,
//!   so slicing a chunk never copies buffers.
//! - [`Chunk`]: an ordered tuple of equal-cardinality vectors, at most
//!   [`DEFAULT_VECTOR_SIZE`] rows.
//! - [`SelectVector`]: a dense list of selected row indices into a chunk.

pub mod chunk;
pub mod types;
pub mod value;
pub mod vector;

pub use chunk::{Chunk, SelectVector};
pub use types::{LType, LTypeId, DEFAULT_VECTOR_SIZE};
pub use value::{DateValue, IntervalUnit, IntervalValue, Value};
pub use vector::{FlatVector, Vector, VectorBuffer};
