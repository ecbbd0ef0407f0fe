//! Bound expression tree and the function registry.
//!
//! The binder turns parser AST nodes into [`Expr`] trees. Every bound column
//! reference carries a `(relation_tag, column_index)` pair plus a correlation
//! depth; operators and named functions come from the closed [`FuncSub`] /
//! [`FuncId`] sets.

pub mod expr;
pub mod function;

pub use expr::{split_expr_by_and, split_exprs_by_and, ColRef, Expr, ExprKind, FuncSub, SubqueryType};
pub use function::{registry, FuncId, FunctionRegistry};
