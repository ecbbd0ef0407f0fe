//! Vectorized execution for the quiver engine: the expression executor, the
//! pull-based operator driver, and the table scan over delimited text or
//! Parquet files.

pub mod config;
pub mod exec;
pub mod kernels;
pub mod runner;
pub mod scan;

pub use config::{DataFormat, ExecConfig};
pub use exec::{ColumnBindings, ExprExec};
pub use runner::{OperatorResult, Runner};
