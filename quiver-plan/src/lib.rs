//! Query planning for the quiver engine.
//!
//! The pipeline is: bind the parsed AST clause-by-clause ([`binder::Builder`]),
//! translate the bound clauses into a [`logical::LogicalOperator`] tree with
//! correlated subqueries flattened (APPLY), run the rule-based optimizer
//! (predicate pushdown, join-order graph), then lower to a
//! [`physical::PhysicalOperator`] tree with pruned columns and per-operator
//! output layouts.

pub mod bind;
pub mod binder;
pub mod joinorder;
pub mod logical;
pub mod optimizer;
pub mod physical;
pub mod planner;

pub use bind::{BindContext, Binding, BindingType, OuterScope};
pub use binder::Builder;
pub use logical::{JoinType, LogicalOperator};
pub use optimizer::optimize;
pub use physical::{create_physical_plan, ColumnBinding, PhysicalOperator};
