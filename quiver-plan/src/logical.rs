use std::fmt;

use quiver_expr::{Expr, ExprKind};
use rustc_hash::FxHashSet;

/// Logical join type. Cross joins are inner joins with no conditions; the
/// planner folds them together and the executor falls back to a cross product
/// when no equi-conditions survive pushdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "inner"),
            JoinType::Left => write!(f, "left"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogicalScan {
    pub index: u64,
    pub database: String,
    pub table: String,
    /// Predicates referencing only this scan; filled by pushdown.
    pub filters: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct LogicalFilter {
    pub filters: Vec<Expr>,
    pub child: Box<LogicalOperator>,
}

#[derive(Debug, Clone)]
pub struct LogicalJoin {
    pub join_typ: JoinType,
    pub on_conds: Vec<Expr>,
    pub left: Box<LogicalOperator>,
    pub right: Box<LogicalOperator>,
}

#[derive(Debug, Clone)]
pub struct LogicalProject {
    pub index: u64,
    pub projects: Vec<Expr>,
    pub child: Box<LogicalOperator>,
}

#[derive(Debug, Clone)]
pub struct LogicalAggGroup {
    /// Relation tag of the group columns.
    pub index: u64,
    /// Relation tag of the aggregate values.
    pub index2: u64,
    pub aggs: Vec<Expr>,
    pub group_bys: Vec<Expr>,
    /// HAVING-like predicates over aggregate outputs; filled by pushdown.
    pub filters: Vec<Expr>,
    pub child: Box<LogicalOperator>,
}

#[derive(Debug, Clone)]
pub struct LogicalOrder {
    pub order_bys: Vec<Expr>,
    pub child: Box<LogicalOperator>,
}

#[derive(Debug, Clone)]
pub struct LogicalLimit {
    pub limit: Expr,
    pub child: Box<LogicalOperator>,
}

/// Logical operator tree. Strictly owned: each node has a unique parent.
#[derive(Debug, Clone)]
pub enum LogicalOperator {
    Scan(LogicalScan),
    Filter(LogicalFilter),
    Join(LogicalJoin),
    Project(LogicalProject),
    AggGroup(LogicalAggGroup),
    Order(LogicalOrder),
    Limit(LogicalLimit),
}

impl LogicalOperator {
    pub fn children(&self) -> Vec<&LogicalOperator> {
        match self {
            LogicalOperator::Scan(_) => Vec::new(),
            LogicalOperator::Filter(op) => vec![&op.child],
            LogicalOperator::Join(op) => vec![&op.left, &op.right],
            LogicalOperator::Project(op) => vec![&op.child],
            LogicalOperator::AggGroup(op) => vec![&op.child],
            LogicalOperator::Order(op) => vec![&op.child],
            LogicalOperator::Limit(op) => vec![&op.child],
        }
    }

    /// Expressions attached directly to this node.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            LogicalOperator::Scan(op) => op.filters.iter().collect(),
            LogicalOperator::Filter(op) => op.filters.iter().collect(),
            LogicalOperator::Join(op) => op.on_conds.iter().collect(),
            LogicalOperator::Project(op) => op.projects.iter().collect(),
            LogicalOperator::AggGroup(op) => op
                .aggs
                .iter()
                .chain(op.group_bys.iter())
                .chain(op.filters.iter())
                .collect(),
            LogicalOperator::Order(op) => op.order_bys.iter().collect(),
            LogicalOperator::Limit(op) => vec![&op.limit],
        }
    }

    /// Relation tags produced anywhere in this subtree.
    pub fn collect_tags(&self, set: &mut FxHashSet<u64>) {
        match self {
            LogicalOperator::Scan(op) => {
                set.insert(op.index);
            }
            LogicalOperator::Project(op) => {
                set.insert(op.index);
            }
            LogicalOperator::AggGroup(op) => {
                set.insert(op.index);
                set.insert(op.index2);
            }
            _ => {}
        }
        for child in self.children() {
            child.collect_tags(set);
        }
    }

    /// True when any expression in the tree still contains a subquery
    /// reference. After APPLY this must be false.
    pub fn has_subquery(&self) -> bool {
        fn expr_has(expr: &Expr) -> bool {
            match &expr.kind {
                ExprKind::Subquery { .. } => true,
                _ => expr.children().iter().any(|c| expr_has(c)),
            }
        }
        self.exprs().iter().any(|e| expr_has(e))
            || self.children().iter().any(|c| c.has_subquery())
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        match self {
            LogicalOperator::Scan(op) => {
                write!(f, "{pad}Scan [{}] {}.{}", op.index, op.database, op.table)?;
                if !op.filters.is_empty() {
                    write!(f, " filters: {}", join_exprs(&op.filters))?;
                }
                writeln!(f)?;
            }
            LogicalOperator::Filter(op) => {
                writeln!(f, "{pad}Filter {}", join_exprs(&op.filters))?;
            }
            LogicalOperator::Join(op) => {
                write!(f, "{pad}Join ({})", op.join_typ)?;
                if !op.on_conds.is_empty() {
                    write!(f, " on: {}", join_exprs(&op.on_conds))?;
                }
                writeln!(f)?;
            }
            LogicalOperator::Project(op) => {
                writeln!(f, "{pad}Project [{}] {}", op.index, join_exprs(&op.projects))?;
            }
            LogicalOperator::AggGroup(op) => {
                write!(
                    f,
                    "{pad}AggGroup [{}/{}] aggs: {}",
                    op.index,
                    op.index2,
                    join_exprs(&op.aggs)
                )?;
                if !op.group_bys.is_empty() {
                    write!(f, " groups: {}", join_exprs(&op.group_bys))?;
                }
                if !op.filters.is_empty() {
                    write!(f, " filters: {}", join_exprs(&op.filters))?;
                }
                writeln!(f)?;
            }
            LogicalOperator::Order(op) => {
                writeln!(f, "{pad}Order {}", join_exprs(&op.order_bys))?;
            }
            LogicalOperator::Limit(op) => {
                writeln!(f, "{pad}Limit {}", op.limit)?;
            }
        }
        for child in self.children() {
            child.fmt_node(f, indent + 1)?;
        }
        Ok(())
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, 0)
    }
}
