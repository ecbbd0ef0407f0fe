use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quiver_catalog::{tpch_catalog, TPCH_DATABASE};
use quiver_expr::{registry, split_expr_by_and, Expr, ExprKind, FuncSub, SubqueryType};
use quiver_result::{Error, Result};
use quiver_types::{DateValue, IntervalUnit, IntervalValue, LType, LTypeId};
use rustc_hash::FxHashMap;
use sqlparser::ast::{
    BinaryOperator, DataType, DateTimeField, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Interval, Join as SqlJoin, JoinConstraint, JoinOperator,
    LimitClause, ObjectName, ObjectNamePart, OrderByExpr, OrderByKind, Query,
    SelectItem, SelectItemQualifiedWildcardKind, SetExpr, TableFactor, TableWithJoins,
    UnaryOperator, Value as SqlValue,
};

use crate::bind::{resolve_column, BindContext, Binding, BindingType, OuterScope};
use crate::logical::JoinType;

/// Which clause an expression is being bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Select,
    Where,
    GroupBy,
    Order,
    Limit,
    JoinOn,
}

/// Bound FROM tree: tables and joins, with join conditions already bound.
#[derive(Debug, Clone)]
pub enum FromExpr {
    Table {
        index: u64,
        database: String,
        table: String,
    },
    Join {
        join_typ: JoinType,
        on_conds: Vec<Expr>,
        left: Box<FromExpr>,
        right: Box<FromExpr>,
    },
}

enum SelectEntry<'a> {
    Ast {
        expr: &'a SqlExpr,
        alias: Option<String>,
    },
    Bound(Expr),
}

/// Walks the AST clause-by-clause and produces bound expressions plus the
/// clause lists the planner consumes.
///
/// The relation-tag counter is shared with every nested subquery builder so
/// tags stay unique across the whole query.
pub struct Builder {
    tag: Arc<AtomicU64>,
    pub project_tag: u64,
    pub group_tag: u64,
    pub agg_tag: u64,
    pub root_ctx: BindContext,

    /// SELECT alias → select-list index.
    pub alias_map: FxHashMap<String, usize>,
    /// SELECT expression text → select-list index.
    pub project_map: FxHashMap<String, usize>,

    pub project_exprs: Vec<Expr>,
    pub from_expr: Option<FromExpr>,
    pub where_expr: Option<Expr>,
    pub aggs: Vec<Expr>,
    pub groupby_exprs: Vec<Expr>,
    pub orderby_exprs: Vec<Expr>,
    pub limit_count: Option<Expr>,

    /// Nested subquery builders; `ExprKind::Subquery` carries an index into
    /// this list.
    pub subqueries: Vec<Builder>,

    /// Output column names in select-list order.
    pub names: Vec<String>,
    pub column_count: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self::with_counter(Arc::new(AtomicU64::new(0)))
    }

    fn with_counter(tag: Arc<AtomicU64>) -> Self {
        Self {
            tag,
            project_tag: 0,
            group_tag: 0,
            agg_tag: 0,
            root_ctx: BindContext::new(),
            alias_map: FxHashMap::default(),
            project_map: FxHashMap::default(),
            project_exprs: Vec::new(),
            from_expr: None,
            where_expr: None,
            aggs: Vec::new(),
            groupby_exprs: Vec::new(),
            orderby_exprs: Vec::new(),
            limit_count: None,
            subqueries: Vec::new(),
            names: Vec::new(),
            column_count: 0,
        }
    }

    /// Allocate the next relation tag. Tags start at one; zero never names a
    /// relation.
    pub fn get_tag(&self) -> u64 {
        self.tag.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Bind a SELECT query. `outer` carries the parent scope chain when this
    /// builder binds a subquery.
    pub fn build_select(&mut self, query: &Query, outer: Option<&OuterScope<'_>>) -> Result<()> {
        validate_query(query)?;
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select.as_ref(),
            other => {
                return Err(Error::unsupported(format!(
                    "query body {other} is not a plain SELECT"
                )))
            }
        };
        if select.having.is_some() {
            return Err(Error::unsupported("HAVING"));
        }
        if select.distinct.is_some() {
            return Err(Error::unsupported("SELECT DISTINCT"));
        }

        self.project_tag = self.get_tag();
        self.group_tag = self.get_tag();
        self.agg_tag = self.get_tag();

        let mut ctx = std::mem::take(&mut self.root_ctx);

        // FROM
        self.from_expr = Some(self.build_from(&mut ctx, &select.from, outer)?);

        // SELECT names and aliases, with wildcard expansion against the
        // FROM bindings in insertion order.
        let mut entries: Vec<SelectEntry<'_>> = Vec::new();
        for item in &select.projection {
            let idx = entries.len();
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    self.names.push(expr.to_string());
                    self.project_map.insert(expr.to_string(), idx);
                    entries.push(SelectEntry::Ast { expr, alias: None });
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.alias_map.insert(alias.value.clone(), idx);
                    self.names.push(alias.value.clone());
                    self.project_map.insert(expr.to_string(), idx);
                    entries.push(SelectEntry::Ast {
                        expr,
                        alias: Some(alias.value.clone()),
                    });
                }
                SelectItem::Wildcard(_) => {
                    for binding in ctx.bindings() {
                        for (col_idx, name) in binding.names.iter().enumerate() {
                            self.names.push(name.clone());
                            entries.push(SelectEntry::Bound(Expr::column(
                                &binding.alias,
                                name,
                                (binding.index, col_idx),
                                0,
                                binding.types[col_idx],
                            )));
                        }
                    }
                }
                SelectItem::QualifiedWildcard(kind, _) => {
                    let alias = match kind {
                        SelectItemQualifiedWildcardKind::ObjectName(name) => {
                            object_name_string(name)?
                        }
                        _ => return Err(Error::unsupported("qualified wildcard expression")),
                    };
                    let binding = ctx
                        .get_binding(&alias)
                        .ok_or_else(|| Error::invalid(format!("table {alias} does not exist")))?;
                    for (col_idx, name) in binding.names.iter().enumerate() {
                        self.names.push(name.clone());
                        entries.push(SelectEntry::Bound(Expr::column(
                            &binding.alias,
                            name,
                            (binding.index, col_idx),
                            0,
                            binding.types[col_idx],
                        )));
                    }
                }
            }
        }
        self.column_count = entries.len();

        // WHERE
        if let Some(selection) = &select.selection {
            let bound = self.bind_expr(&ctx, outer, Clause::Where, selection, 0)?;
            self.where_expr = Some(bound);
        }

        // ORDER BY
        if let Some(order_by) = &query.order_by {
            match &order_by.kind {
                OrderByKind::Expressions(exprs) => {
                    for ob in exprs {
                        let bound = self.bind_order_expr(&ctx, outer, ob)?;
                        self.orderby_exprs.push(bound);
                    }
                }
                OrderByKind::All(_) => return Err(Error::unsupported("ORDER BY ALL")),
            }
        }

        // LIMIT
        if let Some(limit_clause) = &query.limit_clause {
            match limit_clause {
                LimitClause::LimitOffset {
                    limit: Some(limit),
                    offset: None,
                    limit_by,
                } if limit_by.is_empty() => {
                    let bound = self.bind_expr(&ctx, outer, Clause::Limit, limit, 0)?;
                    self.limit_count = Some(bound);
                }
                _ => return Err(Error::unsupported("LIMIT with OFFSET or BY")),
            }
        }

        // GROUP BY
        match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(Error::unsupported("GROUP BY modifiers"));
                }
                for expr in exprs {
                    let bound = self.bind_expr(&ctx, outer, Clause::GroupBy, expr, 0)?;
                    self.groupby_exprs.push(bound);
                }
            }
            GroupByExpr::All(_) => return Err(Error::unsupported("GROUP BY ALL")),
        }

        // SELECT expressions, last so aliased references already resolve.
        for entry in entries {
            match entry {
                SelectEntry::Ast { expr, alias } => {
                    let mut bound = self.bind_expr(&ctx, outer, Clause::Select, expr, 0)?;
                    if alias.is_some() {
                        bound.alias = alias;
                    }
                    self.project_exprs.push(bound);
                }
                SelectEntry::Bound(bound) => self.project_exprs.push(bound),
            }
        }

        self.root_ctx = ctx;
        Ok(())
    }

    fn build_from(
        &mut self,
        ctx: &mut BindContext,
        from: &[TableWithJoins],
        outer: Option<&OuterScope<'_>>,
    ) -> Result<FromExpr> {
        if from.is_empty() {
            return Err(Error::unsupported("SELECT without FROM"));
        }
        let mut root: Option<FromExpr> = None;
        for twj in from {
            let item = self.build_table_with_joins(ctx, twj, outer)?;
            root = Some(match root {
                None => item,
                // Comma-separated FROM items are cross joins; pushdown later
                // recovers the equi-conditions.
                Some(prev) => FromExpr::Join {
                    join_typ: JoinType::Inner,
                    on_conds: Vec::new(),
                    left: Box::new(prev),
                    right: Box::new(item),
                },
            });
        }
        Ok(root.expect("from list checked non-empty"))
    }

    fn build_table_with_joins(
        &mut self,
        ctx: &mut BindContext,
        twj: &TableWithJoins,
        outer: Option<&OuterScope<'_>>,
    ) -> Result<FromExpr> {
        let mut joined_ctx = BindContext::new();
        let mut root = self.build_table(&mut joined_ctx, &twj.relation, outer)?;
        for join in &twj.joins {
            root = self.build_join(&mut joined_ctx, root, join, outer)?;
        }
        ctx.add_context(joined_ctx)?;
        Ok(root)
    }

    fn build_join(
        &mut self,
        joined_ctx: &mut BindContext,
        left: FromExpr,
        join: &SqlJoin,
        outer: Option<&OuterScope<'_>>,
    ) -> Result<FromExpr> {
        let mut right_ctx = BindContext::new();
        let right = self.build_table(&mut right_ctx, &join.relation, outer)?;
        joined_ctx.add_context(right_ctx)?;

        let (join_typ, constraint) = match &join.join_operator {
            JoinOperator::Join(c) | JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
            JoinOperator::Left(c) | JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
            JoinOperator::CrossJoin => (JoinType::Inner, None),
            other => {
                return Err(Error::unsupported(format!("join type {other:?}")));
            }
        };
        let mut on_conds = Vec::new();
        if let Some(constraint) = constraint {
            match constraint {
                JoinConstraint::On(expr) => {
                    let bound = self.bind_expr(joined_ctx, outer, Clause::JoinOn, expr, 0)?;
                    on_conds = split_expr_by_and(&bound);
                }
                JoinConstraint::None => {}
                other => {
                    return Err(Error::unsupported(format!("join constraint {other:?}")));
                }
            }
        }
        Ok(FromExpr::Join {
            join_typ,
            on_conds,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn build_table(
        &mut self,
        ctx: &mut BindContext,
        factor: &TableFactor,
        outer: Option<&OuterScope<'_>>,
    ) -> Result<FromExpr> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = object_name_string(name)?;
                let def = tpch_catalog().table(TPCH_DATABASE, &table)?;
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table.clone());
                let index = self.get_tag();
                let binding = Binding::new(
                    BindingType::Table,
                    TPCH_DATABASE,
                    &alias,
                    index,
                    def.types.clone(),
                    def.columns.clone(),
                );
                ctx.add_binding(binding)?;
                Ok(FromExpr::Table {
                    index,
                    database: TPCH_DATABASE.to_string(),
                    table,
                })
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.build_table_with_joins(ctx, table_with_joins, outer),
            other => Err(Error::unsupported(format!("table factor {other}"))),
        }
    }

    fn bind_order_expr(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        ob: &OrderByExpr,
    ) -> Result<Expr> {
        let desc = !ob.options.asc.unwrap_or(true);
        // A SELECT alias or the text of a SELECT expression refers to the
        // projected column.
        let key = ob.expr.to_string();
        let select_idx = match &ob.expr {
            SqlExpr::Identifier(ident) => self
                .alias_map
                .get(&ident.value)
                .or_else(|| self.project_map.get(&key))
                .copied(),
            _ => self.project_map.get(&key).copied(),
        };
        let child = match select_idx {
            Some(idx) => {
                let mut col = Expr::column("", &key, (self.project_tag, idx), 0, LType::invalid());
                col.alias = Some(key);
                col
            }
            None => self.bind_expr(ctx, outer, Clause::Order, &ob.expr, 0)?,
        };
        let data_typ = child.data_typ;
        Ok(Expr::new(
            ExprKind::OrderBy {
                desc,
                child: Box::new(child),
            },
            data_typ,
        ))
    }

    /// Bind one expression for the given clause.
    pub fn bind_expr(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        clause: Clause,
        expr: &SqlExpr,
        depth: usize,
    ) -> Result<Expr> {
        match expr {
            SqlExpr::Value(value) => bind_value(&value.value),
            SqlExpr::Identifier(ident) => self.bind_column(ctx, outer, None, &ident.value),
            SqlExpr::CompoundIdentifier(parts) => {
                if parts.len() != 2 {
                    return Err(Error::unsupported(format!(
                        "column reference {expr} with {} parts",
                        parts.len()
                    )));
                }
                self.bind_column(ctx, outer, Some(&parts[0].value), &parts[1].value)
            }
            SqlExpr::Nested(inner) => self.bind_expr(ctx, outer, clause, inner, depth),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Plus,
                expr: inner,
            } => self.bind_expr(ctx, outer, clause, inner, depth),
            SqlExpr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: inner,
            } => {
                let bound = self.bind_expr(ctx, outer, clause, inner, depth)?;
                match bound.kind {
                    ExprKind::IntConst(v) => {
                        Ok(Expr::new(ExprKind::IntConst(-v), LType::integer()))
                    }
                    ExprKind::FloatConst(v) => {
                        Ok(Expr::new(ExprKind::FloatConst(-v), LType::float()))
                    }
                    _ => Err(Error::unsupported("unary minus over a non-literal")),
                }
            }
            SqlExpr::BinaryOp { left, op, right } => {
                self.bind_binary(ctx, outer, clause, left, op, right, depth)
            }
            SqlExpr::Between {
                expr: operand,
                negated,
                low,
                high,
            } => {
                if *negated {
                    return Err(Error::unsupported("NOT BETWEEN"));
                }
                let operand = self.bind_expr(ctx, outer, clause, operand, depth)?;
                let low = self.bind_expr(ctx, outer, clause, low, depth)?;
                let high = self.bind_expr(ctx, outer, clause, high, depth)?;
                check_operand_types(&low, &high)?;
                Ok(Expr::new(
                    ExprKind::Func {
                        sub: FuncSub::Between,
                        func: None,
                        between: Some(Box::new(operand)),
                        children: vec![low, high],
                    },
                    LType::boolean(),
                ))
            }
            SqlExpr::Like {
                negated,
                expr: operand,
                pattern,
                ..
            } => {
                let operand = self.bind_expr(ctx, outer, clause, operand, depth)?;
                let pattern = self.bind_expr(ctx, outer, clause, pattern, depth)?;
                let sub = if *negated {
                    FuncSub::NotLike
                } else {
                    FuncSub::Like
                };
                Ok(Expr::func(sub, vec![operand, pattern], LType::boolean()))
            }
            SqlExpr::InList {
                expr: operand,
                list,
                negated,
            } => {
                let mut children = vec![self.bind_expr(ctx, outer, clause, operand, depth)?];
                for item in list {
                    children.push(self.bind_expr(ctx, outer, clause, item, depth)?);
                }
                let sub = if *negated { FuncSub::NotIn } else { FuncSub::In };
                Ok(Expr::func(sub, children, LType::boolean()))
            }
            SqlExpr::InSubquery { .. } => Err(Error::unsupported("IN (subquery)")),
            SqlExpr::Exists { subquery, negated } => {
                let styp = if *negated {
                    SubqueryType::NotExists
                } else {
                    SubqueryType::Exists
                };
                let sub = self.bind_subquery(ctx, outer, subquery, styp)?;
                let sub_fn = if *negated {
                    FuncSub::NotExists
                } else {
                    FuncSub::Exists
                };
                Ok(Expr::func(sub_fn, vec![sub], LType::boolean()))
            }
            SqlExpr::Subquery(subquery) => {
                self.bind_subquery(ctx, outer, subquery, SubqueryType::Scalar)
            }
            SqlExpr::TypedString { data_type, value } => match data_type {
                DataType::Date => {
                    let text = single_quoted(&value.value)?;
                    let date = DateValue::parse_iso(&text)?;
                    Ok(Expr::new(ExprKind::DateConst(date), LType::date()))
                }
                other => Err(Error::unsupported(format!("typed literal {other}"))),
            },
            SqlExpr::Interval(interval) => bind_interval(interval),
            SqlExpr::Function(func) => self.bind_function(ctx, outer, clause, func, depth),
            SqlExpr::Case { .. } => Err(Error::unsupported("CASE expression")),
            other => Err(Error::unsupported(format!("expression {other}"))),
        }
    }

    fn bind_column(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        table: Option<&str>,
        column: &str,
    ) -> Result<Expr> {
        let (binding, depth) = resolve_column(ctx, outer, table, column)?;
        binding.bind_column(column, depth)
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_binary(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        clause: Clause,
        left: &SqlExpr,
        op: &BinaryOperator,
        right: &SqlExpr,
        depth: usize,
    ) -> Result<Expr> {
        let left = self.bind_expr(ctx, outer, clause, left, depth)?;
        let right = self.bind_expr(ctx, outer, clause, right, depth)?;
        check_operand_types(&left, &right)?;

        let sub = match op {
            BinaryOperator::And => FuncSub::And,
            BinaryOperator::Or => FuncSub::Or,
            BinaryOperator::Plus => FuncSub::Add,
            BinaryOperator::Minus => FuncSub::Sub,
            BinaryOperator::Multiply => FuncSub::Mul,
            BinaryOperator::Divide => FuncSub::Div,
            BinaryOperator::Eq => FuncSub::Equal,
            BinaryOperator::NotEq => FuncSub::NotEqual,
            BinaryOperator::Gt => FuncSub::Greater,
            BinaryOperator::GtEq => FuncSub::GreaterEqual,
            BinaryOperator::Lt => FuncSub::Less,
            BinaryOperator::LtEq => FuncSub::LessEqual,
            other => return Err(Error::unsupported(format!("binary operator {other}"))),
        };
        let data_typ = if sub.yields_boolean() {
            LType::boolean()
        } else {
            arith_result_type(sub, &left, &right)
        };
        Ok(Expr::func(sub, vec![left, right], data_typ))
    }

    fn bind_function(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        clause: Clause,
        func: &sqlparser::ast::Function,
        depth: usize,
    ) -> Result<Expr> {
        let name = object_name_string(&func.name)?.to_ascii_lowercase();
        let args = match &func.args {
            FunctionArguments::List(list) => list.args.as_slice(),
            FunctionArguments::None => &[],
            FunctionArguments::Subquery(_) => {
                return Err(Error::unsupported("subquery function argument"));
            }
        };

        let mut children = Vec::with_capacity(args.len());
        for arg in args {
            let arg_expr = match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                    self.bind_expr(ctx, outer, clause, e, depth)?
                }
                FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                    if name != "count" || args.len() != 1 {
                        return Err(Error::invalid(format!("{name}(*) is not a function")));
                    }
                    // count(*) counts rows: rewrite to column 0 of the first
                    // FROM binding before binding the argument.
                    let binding = ctx
                        .bindings()
                        .first()
                        .ok_or_else(|| Error::invalid("count(*) without a FROM table"))?;
                    binding.bind_column(binding.names[0].as_str(), 0)?
                }
                other => {
                    return Err(Error::unsupported(format!("function argument {other}")));
                }
            };
            children.push(arg_expr);
        }

        let id = registry().resolve(&name)?;
        let arg_types: Vec<LType> = children.iter().map(|c| c.data_typ).collect();
        let data_typ = registry().return_type(id, &arg_types)?;
        let call = Expr::new(
            ExprKind::Func {
                sub: FuncSub::Function,
                func: Some(id),
                between: None,
                children,
            },
            data_typ,
        );

        if registry().is_aggregate(id) {
            // Each distinct aggregate call appears exactly once in the list;
            // everything else references it through a synthetic column.
            let pos = match self.aggs.iter().position(|a| a.kind == call.kind) {
                Some(pos) => pos,
                None => {
                    self.aggs.push(call.clone());
                    self.aggs.len() - 1
                }
            };
            let table = format!("AggNode_{}", self.agg_tag);
            let mut column = Expr::column(
                &table,
                &func.to_string(),
                (self.agg_tag, pos),
                0,
                data_typ,
            );
            column.alias = Some(func.to_string());
            return Ok(column);
        }
        Ok(call)
    }

    fn bind_subquery(
        &mut self,
        ctx: &BindContext,
        outer: Option<&OuterScope<'_>>,
        query: &Query,
        styp: SubqueryType,
    ) -> Result<Expr> {
        let mut sub = Builder::with_counter(Arc::clone(&self.tag));
        let scope = OuterScope {
            ctx,
            parent: outer,
        };
        sub.build_select(query, Some(&scope))?;
        let index = self.subqueries.len();
        self.subqueries.push(sub);
        Ok(Expr::new(
            ExprKind::Subquery {
                index,
                subquery_typ: styp,
            },
            LType::invalid(),
        ))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_query(query: &Query) -> Result<()> {
    if query.with.is_some()
        || query.fetch.is_some()
        || !query.locks.is_empty()
        || query.for_clause.is_some()
        || query.settings.is_some()
        || query.format_clause.is_some()
        || !query.pipe_operators.is_empty()
    {
        return Err(Error::unsupported("query feature outside plain SELECT"));
    }
    Ok(())
}

fn bind_value(value: &SqlValue) -> Result<Expr> {
    match value {
        SqlValue::Number(text, _) => {
            if text.contains(['.', 'e', 'E']) {
                let v: f64 = text
                    .parse()
                    .map_err(|err| Error::invalid(format!("bad number {text}: {err}")))?;
                Ok(Expr::new(ExprKind::FloatConst(v), LType::float()))
            } else {
                let v: i64 = text
                    .parse()
                    .map_err(|err| Error::invalid(format!("bad number {text}: {err}")))?;
                Ok(Expr::new(ExprKind::IntConst(v), LType::integer()))
            }
        }
        SqlValue::SingleQuotedString(text) => Ok(Expr::new(
            ExprKind::StrConst(text.clone()),
            LType::varchar(0),
        )),
        other => Err(Error::unsupported(format!("literal {other}"))),
    }
}

fn bind_interval(interval: &Interval) -> Result<Expr> {
    let count = match interval.value.as_ref() {
        SqlExpr::Value(v) => match &v.value {
            SqlValue::SingleQuotedString(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|err| Error::invalid(format!("bad interval {s:?}: {err}")))?,
            SqlValue::Number(s, _) => s
                .parse::<i64>()
                .map_err(|err| Error::invalid(format!("bad interval {s:?}: {err}")))?,
            other => return Err(Error::unsupported(format!("interval literal {other}"))),
        },
        other => return Err(Error::unsupported(format!("interval expression {other}"))),
    };
    let unit = match interval.leading_field {
        Some(DateTimeField::Day) => IntervalUnit::Day,
        Some(DateTimeField::Month) => IntervalUnit::Month,
        Some(DateTimeField::Year) => IntervalUnit::Year,
        ref other => {
            return Err(Error::unsupported(format!("interval unit {other:?}")));
        }
    };
    Ok(Expr::new(
        ExprKind::IntervalConst(IntervalValue { count, unit }),
        LType::interval(),
    ))
}

/// The relaxed operand rule: mismatched types pass only for
/// integer↔decimal, either side invalid, a right-hand interval or float
/// constant, or a right-hand subquery.
fn check_operand_types(left: &Expr, right: &Expr) -> Result<()> {
    let lt = left.data_typ;
    let rt = right.data_typ;
    if lt.id == rt.id {
        return Ok(());
    }
    let int_decimal = matches!(
        (lt.id, rt.id),
        (LTypeId::Integer, LTypeId::Decimal) | (LTypeId::Decimal, LTypeId::Integer)
    );
    if int_decimal
        || lt.id == LTypeId::Invalid
        || rt.id == LTypeId::Invalid
        || matches!(
            right.kind,
            ExprKind::IntervalConst(_) | ExprKind::FloatConst(_)
        )
        || right.is_subquery()
    {
        return Ok(());
    }
    Err(Error::invalid(format!(
        "operand type mismatch: {lt} vs {rt}"
    )))
}

fn arith_result_type(sub: FuncSub, left: &Expr, right: &Expr) -> LType {
    let lt = left.data_typ;
    let rt = right.data_typ;
    if lt.id == LTypeId::Date && matches!(right.kind, ExprKind::IntervalConst(_)) {
        return LType::date();
    }
    match (lt.id, rt.id) {
        (LTypeId::Integer, LTypeId::Integer) => LType::integer(),
        (LTypeId::Float, _) | (_, LTypeId::Float) => LType::float(),
        (LTypeId::Decimal, LTypeId::Decimal) => match sub {
            FuncSub::Mul => LType::decimal(18, lt.scale.saturating_add(rt.scale)),
            FuncSub::Div => LType::float(),
            _ => LType::decimal(18, lt.scale.max(rt.scale)),
        },
        // Integer and decimal mix on the decimal side so the relaxation rule
        // stays value-preserving.
        (LTypeId::Decimal, LTypeId::Integer) => LType::decimal(18, lt.scale),
        (LTypeId::Integer, LTypeId::Decimal) => LType::decimal(18, rt.scale),
        _ => lt,
    }
}

fn object_name_string(name: &ObjectName) -> Result<String> {
    let part = name
        .0
        .last()
        .ok_or_else(|| Error::invalid("empty object name"))?;
    match part {
        ObjectNamePart::Identifier(ident) => Ok(ident.value.clone()),
        _ => Err(Error::unsupported("object name expression")),
    }
}

fn single_quoted(value: &SqlValue) -> Result<String> {
    match value {
        SqlValue::SingleQuotedString(s) => Ok(s.clone()),
        other => Err(Error::invalid(format!("expected a string literal, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn parse(sql: &str) -> Query {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        match statements.into_iter().next().unwrap() {
            Statement::Query(q) => *q,
            other => panic!("expected query, got {other:?}"),
        }
    }

    fn bind(sql: &str) -> Builder {
        let query = parse(sql);
        let mut builder = Builder::new();
        builder.build_select(&query, None).unwrap();
        builder
    }

    #[test]
    fn binds_simple_select() {
        let b = bind("SELECT n_name, n_regionkey FROM nation WHERE n_regionkey = 1");
        assert_eq!(b.names, vec!["n_name", "n_regionkey"]);
        assert_eq!(b.project_exprs.len(), 2);
        let col = &b.project_exprs[0];
        match &col.kind {
            ExprKind::Column { col_ref, depth, .. } => {
                assert_eq!(col_ref.1, 1);
                assert_eq!(*depth, 0);
            }
            other => panic!("expected column, got {other:?}"),
        }
        assert!(b.where_expr.is_some());
    }

    #[test]
    fn binding_is_idempotent_modulo_tags() {
        let sql = "SELECT n_name, count(*) FROM nation WHERE n_regionkey = 1 \
                   GROUP BY n_name ORDER BY n_name";
        let a = bind(sql);
        let b = bind(sql);
        // Fresh builders allocate the same tags, so the trees match exactly.
        assert_eq!(a.project_exprs, b.project_exprs);
        assert_eq!(a.where_expr, b.where_expr);
        assert_eq!(a.groupby_exprs, b.groupby_exprs);
        assert_eq!(a.orderby_exprs, b.orderby_exprs);
        assert_eq!(a.aggs, b.aggs);
    }

    #[test]
    fn count_star_rewrites_to_first_column() {
        let b = bind("SELECT count(*) FROM nation");
        assert_eq!(b.aggs.len(), 1);
        match &b.aggs[0].kind {
            ExprKind::Func { children, .. } => match &children[0].kind {
                ExprKind::Column { name, col_ref, .. } => {
                    assert_eq!(name, "n_nationkey");
                    assert_eq!(col_ref.1, 0);
                }
                other => panic!("expected column, got {other:?}"),
            },
            other => panic!("expected function, got {other:?}"),
        }
        // The select list references the aggregate through a synthetic column.
        match &b.project_exprs[0].kind {
            ExprKind::Column { col_ref, .. } => assert_eq!(*col_ref, (b.agg_tag, 0)),
            other => panic!("expected column, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_aggregates_bind_once() {
        let b = bind("SELECT sum(n_regionkey), sum(n_regionkey) FROM nation");
        assert_eq!(b.aggs.len(), 1);
    }

    #[test]
    fn ambiguous_column_is_an_error() {
        let query = parse("SELECT n_name FROM nation n1, nation n2");
        let mut builder = Builder::new();
        let err = builder.build_select(&query, None).unwrap_err();
        assert!(err.to_string().contains("ambiguous column"), "{err}");
    }

    #[test]
    fn order_by_alias_resolves_to_project_slot() {
        let b = bind("SELECT n_name, count(*) AS cnt FROM nation GROUP BY n_name ORDER BY cnt DESC");
        assert_eq!(b.orderby_exprs.len(), 1);
        match &b.orderby_exprs[0].kind {
            ExprKind::OrderBy { desc, child } => {
                assert!(*desc);
                assert_eq!(child.col_ref(), Some((b.project_tag, 1)));
            }
            other => panic!("expected order wrapper, got {other:?}"),
        }
    }

    #[test]
    fn correlated_column_carries_depth() {
        let b = bind(
            "SELECT n_name FROM nation n WHERE n_regionkey = \
             (SELECT r_regionkey FROM region r WHERE r.r_name = n.n_name)",
        );
        assert_eq!(b.subqueries.len(), 1);
        let sub = &b.subqueries[0];
        let corr = sub.where_expr.as_ref().unwrap();
        assert!(corr.has_corr_col());
    }

    #[test]
    fn between_keeps_operand_in_dedicated_slot() {
        let b = bind("SELECT n_name FROM nation WHERE n_regionkey BETWEEN 1 AND 3");
        let w = b.where_expr.unwrap();
        match &w.kind {
            ExprKind::Func {
                sub: FuncSub::Between,
                between,
                children,
                ..
            } => {
                assert!(between.is_some());
                assert_eq!(children.len(), 2);
            }
            other => panic!("expected between, got {other:?}"),
        }
    }

    #[test]
    fn relaxed_type_rule_rejects_plain_mismatch() {
        let query = parse("SELECT n_name FROM nation WHERE n_name = 3");
        let mut builder = Builder::new();
        let err = builder.build_select(&query, None).unwrap_err();
        assert!(err.to_string().contains("operand type mismatch"), "{err}");
    }

    #[test]
    fn date_and_interval_literals() {
        let b = bind(
            "SELECT l_orderkey FROM lineitem WHERE l_shipdate < DATE '1995-03-15' + INTERVAL '90' DAY",
        );
        let w = b.where_expr.unwrap();
        assert_eq!(w.data_typ, LType::boolean());
    }

    #[test]
    fn having_is_rejected() {
        let query = parse("SELECT n_regionkey FROM nation GROUP BY n_regionkey HAVING count(*) > 1");
        let mut builder = Builder::new();
        let err = builder.build_select(&query, None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
