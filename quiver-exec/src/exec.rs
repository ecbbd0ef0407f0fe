//! Vectorized evaluation of bound expression trees against up to three input
//! chunks, conventionally (left, right, extra).
//!
//! A `Column` expression resolves through a small `(tag, column) → (input,
//! slot)` map built from the physical operators' output layouts, so pruned
//! layouts never require rewriting column indices inside expressions.

use std::sync::Arc;

use quiver_expr::{ColRef, Expr, ExprKind, FuncId, FuncSub};
use quiver_plan::ColumnBinding;
use quiver_result::{Error, Result};
use quiver_types::{Chunk, FlatVector, SelectVector, Value, Vector};
use rustc_hash::FxHashMap;

use crate::kernels::{and3, arith_value, compare_sql, comparison_verdict, like_match, or3};

/// Maps `(relation_tag, column)` to a (input slot, column slot) pair for the
/// current operator.
#[derive(Debug, Default, Clone)]
pub struct ColumnBindings {
    map: FxHashMap<ColRef, (usize, usize)>,
}

impl ColumnBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `layout` as input number `input` (0 = left, 1 = right,
    /// 2 = extra).
    pub fn bind(&mut self, input: usize, layout: &[ColumnBinding]) {
        for (slot, binding) in layout.iter().enumerate() {
            self.map.insert((binding.tag, binding.column), (input, slot));
        }
    }

    fn resolve(&self, col_ref: ColRef) -> Result<(usize, usize)> {
        self.map.get(&col_ref).copied().ok_or_else(|| {
            Error::internal(format!(
                "column [{}.{}] is not produced by any input",
                col_ref.0, col_ref.1
            ))
        })
    }
}

/// Expression executor: a set of expressions plus the input bindings they
/// are evaluated against.
pub struct ExprExec {
    exprs: Vec<Expr>,
    bindings: ColumnBindings,
}

impl ExprExec {
    pub fn new(exprs: Vec<Expr>, bindings: ColumnBindings) -> Self {
        Self { exprs, bindings }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    fn cardinality(inputs: &[Option<&Chunk>; 3]) -> usize {
        inputs
            .iter()
            .flatten()
            .map(|c| c.card())
            .next()
            .unwrap_or(1)
    }

    /// Materialize one output column per expression.
    pub fn execute_exprs(&self, inputs: [Option<&Chunk>; 3]) -> Result<Chunk> {
        let count = Self::cardinality(&inputs);
        let mut columns = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            columns.push(self.eval(expr, &inputs, count)?);
        }
        Ok(Chunk::from_arcs(columns, count))
    }

    /// Evaluate the conjunction of all expressions as a selection: fills
    /// `sel` with the surviving row indices and returns their count.
    pub fn execute_select(
        &self,
        inputs: [Option<&Chunk>; 3],
        sel: &mut SelectVector,
    ) -> Result<usize> {
        let count = Self::cardinality(&inputs);
        sel.clear();
        let mut verdicts: Vec<Option<bool>> = vec![Some(true); count];
        for expr in &self.exprs {
            let vector = self.eval(expr, &inputs, count)?;
            for (row, verdict) in verdicts.iter_mut().enumerate() {
                if *verdict == Some(true) {
                    *verdict = bool_at(&vector, row);
                }
            }
        }
        for (row, verdict) in verdicts.iter().enumerate() {
            if *verdict == Some(true) {
                sel.push(row);
            }
        }
        Ok(sel.len())
    }

    /// Evaluate a single expression to a scalar against empty inputs.
    pub fn eval_scalar(expr: &Expr) -> Result<Value> {
        let exec = ExprExec::new(vec![expr.clone()], ColumnBindings::new());
        let chunk = exec.execute_exprs([None, None, None])?;
        Ok(chunk.value(0, 0))
    }

    fn eval(&self, expr: &Expr, inputs: &[Option<&Chunk>; 3], count: usize) -> Result<Arc<Vector>> {
        match &expr.kind {
            ExprKind::IntConst(v) => Ok(constant(expr, Value::Integer(*v))),
            ExprKind::FloatConst(v) => Ok(constant(expr, Value::Float(*v))),
            ExprKind::StrConst(v) => Ok(constant(expr, Value::Varchar(v.clone()))),
            ExprKind::DateConst(v) => Ok(constant(expr, Value::Date(*v))),
            ExprKind::IntervalConst(v) => Ok(constant(expr, Value::Interval(*v))),
            ExprKind::Column { col_ref, .. } => {
                let (input, slot) = self.bindings.resolve(*col_ref)?;
                let chunk = inputs[input].ok_or_else(|| {
                    Error::internal(format!("input {input} is absent for column {expr}"))
                })?;
                Ok(Arc::clone(chunk.column(slot)))
            }
            ExprKind::OrderBy { child, .. } => self.eval(child, inputs, count),
            ExprKind::Subquery { .. } => Err(Error::internal(
                "subquery expression survived planning",
            )),
            ExprKind::Func {
                sub,
                func,
                between,
                children,
            } => self.eval_func(expr, *sub, *func, between.as_deref(), children, inputs, count),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_func(
        &self,
        expr: &Expr,
        sub: FuncSub,
        func: Option<FuncId>,
        between: Option<&Expr>,
        children: &[Expr],
        inputs: &[Option<&Chunk>; 3],
        count: usize,
    ) -> Result<Arc<Vector>> {
        match sub {
            FuncSub::And | FuncSub::Or => {
                let left = self.eval(&children[0], inputs, count)?;
                let right = self.eval(&children[1], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let v = if sub == FuncSub::And {
                        and3(bool_at(&left, row), bool_at(&right, row))
                    } else {
                        or3(bool_at(&left, row), bool_at(&right, row))
                    };
                    push_bool(&mut out, v)?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Equal
            | FuncSub::NotEqual
            | FuncSub::Greater
            | FuncSub::GreaterEqual
            | FuncSub::Less
            | FuncSub::LessEqual => {
                let left = self.eval(&children[0], inputs, count)?;
                let right = self.eval(&children[1], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let verdict =
                        comparison_verdict(sub, compare_sql(&left.value(row), &right.value(row)));
                    push_bool(&mut out, verdict)?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Add | FuncSub::Sub | FuncSub::Mul | FuncSub::Div => {
                let left = self.eval(&children[0], inputs, count)?;
                let right = self.eval(&children[1], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let v = arith_value(sub, &left.value(row), &right.value(row), expr.data_typ)?;
                    out.push_value(&v)?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Like | FuncSub::NotLike => {
                let text = self.eval(&children[0], inputs, count)?;
                let pattern = self.eval(&children[1], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let v = match (text.value(row), pattern.value(row)) {
                        (Value::Varchar(t), Value::Varchar(p)) => {
                            let hit = like_match(&t, &p);
                            Some(if sub == FuncSub::Like { hit } else { !hit })
                        }
                        _ => None,
                    };
                    push_bool(&mut out, v)?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Between => {
                let operand = between
                    .ok_or_else(|| Error::internal("BETWEEN without its operand slot"))?;
                let operand = self.eval(operand, inputs, count)?;
                let low = self.eval(&children[0], inputs, count)?;
                let high = self.eval(&children[1], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let v = operand.value(row);
                    let ge = comparison_verdict(
                        FuncSub::GreaterEqual,
                        compare_sql(&v, &low.value(row)),
                    );
                    let le =
                        comparison_verdict(FuncSub::LessEqual, compare_sql(&v, &high.value(row)));
                    push_bool(&mut out, and3(ge, le))?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::In | FuncSub::NotIn => {
                let operand = self.eval(&children[0], inputs, count)?;
                let mut items = Vec::with_capacity(children.len() - 1);
                for item in &children[1..] {
                    items.push(self.eval(item, inputs, count)?);
                }
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let v = operand.value(row);
                    let mut hit = Some(false);
                    for item in &items {
                        let eq = comparison_verdict(
                            FuncSub::Equal,
                            compare_sql(&v, &item.value(row)),
                        );
                        hit = or3(hit, eq);
                        if hit == Some(true) {
                            break;
                        }
                    }
                    let v = match (sub, hit) {
                        (FuncSub::In, h) => h,
                        (FuncSub::NotIn, h) => h.map(|b| !b),
                        _ => None,
                    };
                    push_bool(&mut out, v)?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Exists | FuncSub::NotExists => {
                // Post-APPLY the child is the lifted subquery's column; EXISTS
                // holds where a joined row materialized.
                let child = self.eval(&children[0], inputs, count)?;
                let mut out = FlatVector::new(expr.data_typ)?;
                for row in 0..count {
                    let exists = !child.value(row).is_null();
                    let v = if sub == FuncSub::Exists {
                        exists
                    } else {
                        !exists
                    };
                    push_bool(&mut out, Some(v))?;
                }
                Ok(Arc::new(Vector::Flat(out)))
            }
            FuncSub::Function => match func {
                Some(FuncId::DateAdd) => {
                    let date = self.eval(&children[0], inputs, count)?;
                    let interval = self.eval(&children[1], inputs, count)?;
                    let mut out = FlatVector::new(expr.data_typ)?;
                    for row in 0..count {
                        let v = arith_value(
                            FuncSub::Add,
                            &date.value(row),
                            &interval.value(row),
                            expr.data_typ,
                        )?;
                        out.push_value(&v)?;
                    }
                    Ok(Arc::new(Vector::Flat(out)))
                }
                Some(id) => Err(Error::internal(format!(
                    "aggregate {id} evaluated outside an aggregation operator"
                ))),
                None => Err(Error::internal("function call without an id")),
            },
        }
    }
}

fn constant(expr: &Expr, value: Value) -> Arc<Vector> {
    Arc::new(Vector::constant(expr.data_typ, value))
}

fn bool_at(vector: &Vector, row: usize) -> Option<bool> {
    match vector.value(row) {
        Value::Boolean(b) => Some(b),
        Value::Null => None,
        _ => None,
    }
}

fn push_bool(out: &mut FlatVector, value: Option<bool>) -> Result<()> {
    match value {
        Some(b) => out.push_value(&Value::Boolean(b)),
        None => {
            out.push_null();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::LType;

    fn layout(tag: u64, types: &[LType]) -> Vec<ColumnBinding> {
        types
            .iter()
            .enumerate()
            .map(|(i, t)| ColumnBinding {
                tag,
                column: i,
                typ: *t,
                name: format!("c{i}"),
            })
            .collect()
    }

    fn int_chunk(cols: &[&[Option<i64>]]) -> Chunk {
        let count = cols[0].len();
        let vectors = cols
            .iter()
            .map(|col| {
                let mut v = FlatVector::new(LType::integer()).unwrap();
                for x in col.iter() {
                    match x {
                        Some(x) => v.push_value(&Value::Integer(*x)).unwrap(),
                        None => v.push_null(),
                    }
                }
                Vector::Flat(v)
            })
            .collect();
        Chunk::from_vectors(vectors, count)
    }

    fn col(tag: u64, idx: usize) -> Expr {
        Expr::column("t", &format!("c{idx}"), (tag, idx), 0, LType::integer())
    }

    #[test]
    fn filters_select_surviving_rows() {
        let chunk = int_chunk(&[&[Some(1), Some(5), None, Some(9)]]);
        let mut bindings = ColumnBindings::new();
        bindings.bind(0, &layout(7, &[LType::integer()]));
        let pred = Expr::func(
            FuncSub::Greater,
            vec![col(7, 0), Expr::new(ExprKind::IntConst(2), LType::integer())],
            LType::boolean(),
        );
        let exec = ExprExec::new(vec![pred], bindings);
        let mut sel = SelectVector::new();
        let n = exec
            .execute_select([Some(&chunk), None, None], &mut sel)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(sel.index(0), 1);
        assert_eq!(sel.index(1), 3);
    }

    #[test]
    fn arithmetic_projects_new_columns() {
        let chunk = int_chunk(&[&[Some(2), Some(3)], &[Some(10), Some(20)]]);
        let mut bindings = ColumnBindings::new();
        bindings.bind(0, &layout(1, &[LType::integer(), LType::integer()]));
        let sum = Expr::func(
            FuncSub::Add,
            vec![col(1, 0), col(1, 1)],
            LType::integer(),
        );
        let exec = ExprExec::new(vec![sum], bindings);
        let out = exec.execute_exprs([Some(&chunk), None, None]).unwrap();
        assert_eq!(out.card(), 2);
        assert_eq!(out.value(0, 0), Value::Integer(12));
        assert_eq!(out.value(0, 1), Value::Integer(23));
    }

    #[test]
    fn columns_resolve_across_three_inputs() {
        let left = int_chunk(&[&[Some(1), Some(2)]]);
        let extra = int_chunk(&[&[Some(100), Some(200)]]);
        let mut bindings = ColumnBindings::new();
        bindings.bind(0, &layout(1, &[LType::integer()]));
        bindings.bind(2, &layout(9, &[LType::integer()]));
        let exec = ExprExec::new(vec![col(1, 0), col(9, 0)], bindings);
        let out = exec
            .execute_exprs([Some(&left), None, Some(&extra)])
            .unwrap();
        assert_eq!(out.value(1, 1), Value::Integer(200));
    }

    #[test]
    fn dangling_column_is_internal() {
        let chunk = int_chunk(&[&[Some(1)]]);
        let exec = ExprExec::new(vec![col(3, 0)], ColumnBindings::new());
        let err = exec.execute_exprs([Some(&chunk), None, None]).unwrap_err();
        assert!(err.is_internal());
    }
}
