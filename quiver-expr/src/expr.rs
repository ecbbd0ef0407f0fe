use std::fmt;

use quiver_types::{DateValue, IntervalValue, LType, Value};

use crate::function::FuncId;

/// `(relation_tag, column_index)`: the producing operator's tag and the
/// column's position within it. Tags are indices, never pointers, so plan
/// trees stay acyclic.
pub type ColRef = (u64, usize);

/// Operator and function-call subtypes. Closed set; the binder rejects
/// anything outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncSub {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Like,
    NotLike,
    Between,
    In,
    NotIn,
    Exists,
    NotExists,
    /// A named function call; `func` on the enclosing node identifies it.
    Function,
}

impl FuncSub {
    /// True for subtypes whose result is boolean regardless of operand types.
    pub fn yields_boolean(self) -> bool {
        !matches!(
            self,
            FuncSub::Add | FuncSub::Sub | FuncSub::Mul | FuncSub::Div | FuncSub::Function
        )
    }
}

impl fmt::Display for FuncSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FuncSub::And => "and",
            FuncSub::Or => "or",
            FuncSub::Add => "+",
            FuncSub::Sub => "-",
            FuncSub::Mul => "*",
            FuncSub::Div => "/",
            FuncSub::Equal => "=",
            FuncSub::NotEqual => "<>",
            FuncSub::Greater => ">",
            FuncSub::GreaterEqual => ">=",
            FuncSub::Less => "<",
            FuncSub::LessEqual => "<=",
            FuncSub::Like => "like",
            FuncSub::NotLike => "not like",
            FuncSub::Between => "between",
            FuncSub::In => "in",
            FuncSub::NotIn => "not in",
            FuncSub::Exists => "exists",
            FuncSub::NotExists => "not exists",
            FuncSub::Function => "func",
        };
        write!(f, "{s}")
    }
}

/// How a subquery expression is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryType {
    Scalar,
    Exists,
    NotExists,
}

/// Expression payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntConst(i64),
    FloatConst(f64),
    StrConst(String),
    DateConst(DateValue),
    IntervalConst(IntervalValue),
    /// Bound column reference. `depth > 0` marks a correlated reference to an
    /// outer scope, counted in `BindContext` parent hops.
    Column {
        table: String,
        name: String,
        col_ref: ColRef,
        depth: usize,
    },
    /// Operator or function call. BETWEEN keeps its tested operand in the
    /// dedicated `between` slot; `children` hold the bounds.
    Func {
        sub: FuncSub,
        func: Option<FuncId>,
        between: Option<Box<Expr>>,
        children: Vec<Expr>,
    },
    /// Bound subquery: an index into the owning builder's list of nested
    /// builders. The tree itself holds no binder state.
    Subquery {
        index: usize,
        subquery_typ: SubqueryType,
    },
    /// ORDER BY wrapper around a key expression.
    OrderBy { desc: bool, child: Box<Expr> },
}

/// A bound expression: payload plus resolved data type and optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub data_typ: LType,
    pub alias: Option<String>,
}

impl Expr {
    pub fn new(kind: ExprKind, data_typ: LType) -> Self {
        Self {
            kind,
            data_typ,
            alias: None,
        }
    }

    pub fn constant(value: &Value) -> Self {
        let data_typ = value.ltype();
        let kind = match value {
            Value::Integer(v) => ExprKind::IntConst(*v),
            Value::Float(v) => ExprKind::FloatConst(*v),
            Value::Varchar(v) => ExprKind::StrConst(v.clone()),
            Value::Date(v) => ExprKind::DateConst(*v),
            Value::Interval(v) => ExprKind::IntervalConst(*v),
            other => ExprKind::StrConst(other.to_string()),
        };
        Self::new(kind, data_typ)
    }

    pub fn column(table: &str, name: &str, col_ref: ColRef, depth: usize, data_typ: LType) -> Self {
        Self::new(
            ExprKind::Column {
                table: table.to_string(),
                name: name.to_string(),
                col_ref,
                depth,
            },
            data_typ,
        )
    }

    pub fn func(sub: FuncSub, children: Vec<Expr>, data_typ: LType) -> Self {
        Self::new(
            ExprKind::Func {
                sub,
                func: None,
                between: None,
                children,
            },
            data_typ,
        )
    }

    #[inline]
    pub fn is_column(&self) -> bool {
        matches!(self.kind, ExprKind::Column { .. })
    }

    #[inline]
    pub fn is_subquery(&self) -> bool {
        matches!(self.kind, ExprKind::Subquery { .. })
    }

    pub fn col_ref(&self) -> Option<ColRef> {
        match &self.kind {
            ExprKind::Column { col_ref, .. } => Some(*col_ref),
            _ => None,
        }
    }

    /// Immediate children, including the BETWEEN operand slot.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Func {
                between, children, ..
            } => between
                .iter()
                .map(|b| b.as_ref())
                .chain(children.iter())
                .collect(),
            ExprKind::OrderBy { child, .. } => vec![child.as_ref()],
            _ => Vec::new(),
        }
    }

    /// True when any column in the tree is correlated (`depth > 0`).
    pub fn has_corr_col(&self) -> bool {
        match &self.kind {
            ExprKind::Column { depth, .. } => *depth > 0,
            _ => self.children().iter().any(|c| c.has_corr_col()),
        }
    }

    /// True when the tree contains a subquery reference.
    pub fn has_subquery(&self) -> bool {
        match &self.kind {
            ExprKind::Subquery { .. } => true,
            _ => self.children().iter().any(|c| c.has_subquery()),
        }
    }

    /// Collect correlated column references in discovery order.
    pub fn collect_corr_columns<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match &self.kind {
            ExprKind::Column { depth, .. } if *depth > 0 => out.push(self),
            _ => {
                for child in self.children() {
                    child.collect_corr_columns(out);
                }
            }
        }
    }

    /// Collect every column reference node in the tree, in discovery order.
    pub fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match &self.kind {
            ExprKind::Column { .. } => out.push(self),
            _ => {
                for child in self.children() {
                    child.collect_columns(out);
                }
            }
        }
    }

    /// Collect every `(tag, column)` the tree references.
    pub fn collect_col_refs(&self, out: &mut Vec<ColRef>) {
        match &self.kind {
            ExprKind::Column { col_ref, .. } => out.push(*col_ref),
            _ => {
                for child in self.children() {
                    child.collect_col_refs(out);
                }
            }
        }
    }

    /// True when every column reference carries one of `tags`.
    pub fn only_refers_to(&self, tag: u64) -> bool {
        let mut refs = Vec::new();
        self.collect_col_refs(&mut refs);
        refs.iter().all(|(t, _)| *t == tag)
    }

    /// True when at least one column reference carries `tag`.
    pub fn refers_to(&self, tag: u64) -> bool {
        let mut refs = Vec::new();
        self.collect_col_refs(&mut refs);
        refs.iter().any(|(t, _)| *t == tag)
    }

    /// Strip one level of correlation: every `depth > 0` column becomes a
    /// local reference to the same `(tag, column)`.
    pub fn decorrelated(&self) -> Expr {
        let mut out = self.clone();
        out.strip_depth();
        out
    }

    fn strip_depth(&mut self) {
        match &mut self.kind {
            ExprKind::Column { depth, .. } => *depth = 0,
            ExprKind::Func {
                between, children, ..
            } => {
                if let Some(b) = between {
                    b.strip_depth();
                }
                for child in children {
                    child.strip_depth();
                }
            }
            ExprKind::OrderBy { child, .. } => child.strip_depth(),
            _ => {}
        }
    }

    /// Replace references to `(tag, i)` by clones of `defs[i]`: the inverse of
    /// projection, used by predicate pushdown through Project and AggGroup.
    pub fn restore(&self, tag: u64, defs: &[Expr]) -> Expr {
        match &self.kind {
            ExprKind::Column { col_ref, .. } if col_ref.0 == tag && col_ref.1 < defs.len() => {
                defs[col_ref.1].clone()
            }
            ExprKind::Func {
                sub,
                func,
                between,
                children,
            } => Expr {
                kind: ExprKind::Func {
                    sub: *sub,
                    func: *func,
                    between: between
                        .as_ref()
                        .map(|b| Box::new(b.restore(tag, defs))),
                    children: children.iter().map(|c| c.restore(tag, defs)).collect(),
                },
                data_typ: self.data_typ,
                alias: self.alias.clone(),
            },
            ExprKind::OrderBy { desc, child } => Expr {
                kind: ExprKind::OrderBy {
                    desc: *desc,
                    child: Box::new(child.restore(tag, defs)),
                },
                data_typ: self.data_typ,
                alias: self.alias.clone(),
            },
            _ => self.clone(),
        }
    }
}

/// Split a predicate on AND into its conjuncts.
pub fn split_expr_by_and(expr: &Expr) -> Vec<Expr> {
    if let ExprKind::Func {
        sub: FuncSub::And,
        children,
        ..
    } = &expr.kind
    {
        children.iter().flat_map(split_expr_by_and).collect()
    } else {
        vec![expr.clone()]
    }
}

/// Split every predicate of a list on AND.
pub fn split_exprs_by_and(exprs: &[Expr]) -> Vec<Expr> {
    exprs.iter().flat_map(split_expr_by_and).collect()
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::IntConst(v) => write!(f, "{v}"),
            ExprKind::FloatConst(v) => write!(f, "{v}"),
            ExprKind::StrConst(v) => write!(f, "'{v}'"),
            ExprKind::DateConst(v) => write!(f, "date '{v}'"),
            ExprKind::IntervalConst(v) => write!(f, "interval {} {}", v.count, v.unit),
            ExprKind::Column {
                table,
                name,
                col_ref,
                depth,
            } => {
                if *depth > 0 {
                    write!(f, "{table}.{name}[{}.{}]^{depth}", col_ref.0, col_ref.1)
                } else {
                    write!(f, "{table}.{name}[{}.{}]", col_ref.0, col_ref.1)
                }
            }
            ExprKind::Func {
                sub: FuncSub::Function,
                func,
                children,
                ..
            } => {
                match func {
                    Some(id) => write!(f, "{id}(")?,
                    None => write!(f, "?(")?,
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            ExprKind::Func {
                sub: FuncSub::Between,
                between,
                children,
                ..
            } => {
                if let Some(op) = between {
                    write!(f, "{op} between {} and {}", children[0], children[1])
                } else {
                    write!(f, "between(?)")
                }
            }
            ExprKind::Func { sub, children, .. } => {
                if children.len() == 2 {
                    write!(f, "({} {sub} {})", children[0], children[1])
                } else if children.len() == 1 {
                    write!(f, "{sub}({})", children[0])
                } else {
                    write!(f, "{sub}(")?;
                    for (i, child) in children.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{child}")?;
                    }
                    write!(f, ")")
                }
            }
            ExprKind::Subquery { index, .. } => write!(f, "subquery#{index}"),
            ExprKind::OrderBy { desc, child } => {
                write!(f, "{child} {}", if *desc { "desc" } else { "asc" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::LType;

    fn col(tag: u64, idx: usize, depth: usize) -> Expr {
        Expr::column("t", "c", (tag, idx), depth, LType::integer())
    }

    fn and(l: Expr, r: Expr) -> Expr {
        Expr::func(FuncSub::And, vec![l, r], LType::boolean())
    }

    fn eq(l: Expr, r: Expr) -> Expr {
        Expr::func(FuncSub::Equal, vec![l, r], LType::boolean())
    }

    #[test]
    fn split_flattens_nested_ands() {
        let e = and(
            and(eq(col(1, 0, 0), col(2, 0, 0)), eq(col(1, 1, 0), col(2, 1, 0))),
            eq(col(3, 0, 0), col(1, 0, 0)),
        );
        let parts = split_expr_by_and(&e);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| !matches!(
            p.kind,
            ExprKind::Func {
                sub: FuncSub::And,
                ..
            }
        )));
    }

    #[test]
    fn correlation_detection_walks_between_slot() {
        let mut between = Expr::func(
            FuncSub::Between,
            vec![col(1, 0, 0), col(1, 1, 0)],
            LType::boolean(),
        );
        if let ExprKind::Func { between: slot, .. } = &mut between.kind {
            *slot = Some(Box::new(col(9, 2, 1)));
        }
        assert!(between.has_corr_col());
        let mut corr = Vec::new();
        between.collect_corr_columns(&mut corr);
        assert_eq!(corr.len(), 1);
        assert_eq!(corr[0].col_ref(), Some((9, 2)));
        assert!(!between.decorrelated().has_corr_col());
    }

    #[test]
    fn restore_substitutes_projected_columns() {
        let def = eq(col(1, 0, 0), col(2, 0, 0));
        let pred = eq(col(7, 0, 0), col(3, 1, 0));
        let restored = pred.restore(7, std::slice::from_ref(&def));
        match &restored.kind {
            ExprKind::Func { children, .. } => {
                assert_eq!(children[0], def);
                assert_eq!(children[1], col(3, 1, 0));
            }
            _ => panic!("expected func"),
        }
    }

    #[test]
    fn tag_reference_queries() {
        let e = eq(col(1, 0, 0), col(2, 3, 0));
        assert!(e.refers_to(1));
        assert!(e.refers_to(2));
        assert!(!e.refers_to(3));
        assert!(!e.only_refers_to(1));
        assert!(col(1, 0, 0).only_refers_to(1));
    }
}
