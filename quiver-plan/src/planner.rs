//! Logical plan construction, including APPLY: flattening subqueries into
//! joins. Based on the technique in "Orthogonal Optimization of Subqueries
//! and Aggregation", simplified to the Project/AggGroup/Filter lift.

use quiver_expr::{split_expr_by_and, Expr, ExprKind, SubqueryType};
use quiver_result::{Error, Result};
use quiver_types::{LType, LTypeId};
use rustc_hash::FxHashSet;

use crate::binder::{Builder, FromExpr};
use crate::logical::{
    JoinType, LogicalAggGroup, LogicalFilter, LogicalJoin, LogicalLimit, LogicalOperator,
    LogicalOrder, LogicalProject, LogicalScan,
};

impl Builder {
    /// Translate the bound clauses into a logical operator tree:
    /// Scan/Join → Filter → AggGroup → Project → Order → Limit.
    pub fn create_plan(&mut self) -> Result<LogicalOperator> {
        let from = self
            .from_expr
            .clone()
            .ok_or_else(|| Error::internal("create_plan before build_select"))?;
        let mut root = create_from(&from);

        if let Some(where_expr) = self.where_expr.clone() {
            root = self.create_where(&where_expr, root)?;
        }
        if !self.aggs.is_empty() || !self.groupby_exprs.is_empty() {
            root = self.create_agg_group(root);
        }
        if !self.project_exprs.is_empty() {
            root = self.create_project(root)?;
        }
        if !self.orderby_exprs.is_empty() {
            root = self.create_orderby(root)?;
        }
        if let Some(limit) = self.limit_count.clone() {
            root = LogicalOperator::Limit(LogicalLimit {
                limit,
                child: Box::new(root),
            });
        }
        Ok(root)
    }

    fn create_where(&mut self, expr: &Expr, root: LogicalOperator) -> Result<LogicalOperator> {
        let mut root = root;
        let mut new_filters = Vec::new();
        for filter in split_expr_by_and(expr) {
            let (new_filter, new_root) = self.create_subquery(&filter, root)?;
            root = new_root;
            new_filters.push(new_filter);
        }
        Ok(LogicalOperator::Filter(LogicalFilter {
            filters: new_filters,
            child: Box::new(root),
        }))
    }

    fn create_agg_group(&mut self, root: LogicalOperator) -> LogicalOperator {
        LogicalOperator::AggGroup(LogicalAggGroup {
            index: self.group_tag,
            index2: self.agg_tag,
            aggs: self.aggs.clone(),
            group_bys: self.groupby_exprs.clone(),
            filters: Vec::new(),
            child: Box::new(root),
        })
    }

    fn create_project(&mut self, root: LogicalOperator) -> Result<LogicalOperator> {
        let mut root = root;
        let mut projects = Vec::with_capacity(self.project_exprs.len());
        for expr in self.project_exprs.clone() {
            let (new_expr, new_root) = self.create_subquery(&expr, root)?;
            root = new_root;
            projects.push(new_expr);
        }
        Ok(LogicalOperator::Project(LogicalProject {
            index: self.project_tag,
            projects,
            child: Box::new(root),
        }))
    }

    /// Build the Order node. Keys that match a SELECT expression are
    /// rewritten to `(project_tag, i)` references; alias references bound to
    /// the project tag get their data type patched from the project list.
    fn create_orderby(&mut self, root: LogicalOperator) -> Result<LogicalOperator> {
        let projects = match &root {
            LogicalOperator::Project(p) => p.projects.clone(),
            _ => Vec::new(),
        };
        let mut order_bys = Vec::with_capacity(self.orderby_exprs.len());
        for order in &self.orderby_exprs {
            let (desc, key) = match &order.kind {
                ExprKind::OrderBy { desc, child } => (*desc, child.as_ref().clone()),
                _ => (false, order.clone()),
            };
            let key = self.rewrite_order_key(key, &projects)?;
            let data_typ = key.data_typ;
            let mut wrapped = Expr::new(
                ExprKind::OrderBy {
                    desc,
                    child: Box::new(key),
                },
                data_typ,
            );
            wrapped.alias = order.alias.clone();
            order_bys.push(wrapped);
        }
        Ok(LogicalOperator::Order(LogicalOrder {
            order_bys,
            child: Box::new(root),
        }))
    }

    fn rewrite_order_key(&self, key: Expr, projects: &[Expr]) -> Result<Expr> {
        if let Some((tag, idx)) = key.col_ref() {
            if tag == self.project_tag {
                let mut key = key;
                if key.data_typ.id == LTypeId::Invalid {
                    let def = projects.get(idx).ok_or_else(|| {
                        Error::internal(format!("order key references project column {idx}"))
                    })?;
                    key.data_typ = def.data_typ;
                }
                return Ok(key);
            }
        }
        if let Some(idx) = projects.iter().position(|p| p.kind == key.kind) {
            let mut col = Expr::column(
                "",
                &key.to_string(),
                (self.project_tag, idx),
                0,
                projects[idx].data_typ,
            );
            col.alias = key.alias.clone();
            return Ok(col);
        }
        if projects.is_empty() {
            return Ok(key);
        }
        Err(Error::unsupported(format!(
            "ORDER BY key {key} does not appear in the select list"
        )))
    }

    /// If the expression contains a subquery, flatten the subquery into the
    /// plan and replace the node with a column reference to the first inner
    /// projection.
    fn create_subquery(
        &mut self,
        expr: &Expr,
        root: LogicalOperator,
    ) -> Result<(Expr, LogicalOperator)> {
        match &expr.kind {
            ExprKind::Subquery {
                index,
                subquery_typ,
            } => {
                let index = *index;
                let styp = *subquery_typ;
                match styp {
                    SubqueryType::Scalar | SubqueryType::Exists => {}
                    SubqueryType::NotExists => {
                        // NULL propagation for anti-joins is unspecified in the
                        // flattening used here.
                        return Err(Error::unsupported("NOT EXISTS subquery"));
                    }
                }
                let sub_root = self.subqueries[index].create_plan()?;
                self.apply(index, styp, root, sub_root)
            }
            ExprKind::Func {
                sub,
                func,
                between,
                children,
            } => {
                let mut root = root;
                let new_between = match between {
                    Some(b) => {
                        let (expr, new_root) = self.create_subquery(b, root)?;
                        root = new_root;
                        Some(Box::new(expr))
                    }
                    None => None,
                };
                let mut new_children = Vec::with_capacity(children.len());
                for child in children {
                    let (expr, new_root) = self.create_subquery(child, root)?;
                    root = new_root;
                    new_children.push(expr);
                }
                let out = Expr {
                    kind: ExprKind::Func {
                        sub: *sub,
                        func: *func,
                        between: new_between,
                        children: new_children,
                    },
                    data_typ: expr.data_typ,
                    alias: expr.alias.clone(),
                };
                Ok((out, root))
            }
            _ => Ok((expr.clone(), root)),
        }
    }

    /// APPLY: lift a subquery plan into the outer plan. Uncorrelated inner
    /// plans join directly; correlated ones are decorrelated by pushing the
    /// duplicated outer columns down through Project/AggGroup/Filter.
    ///
    /// Existence checks must not multiply outer rows, so for EXISTS the
    /// correlation-free inner side is collapsed to one row per join key
    /// before it joins the outer plan.
    fn apply(
        &mut self,
        subquery_index: usize,
        styp: SubqueryType,
        root: LogicalOperator,
        sub_root: LogicalOperator,
    ) -> Result<(Expr, LogicalOperator)> {
        let distinct_inner = styp == SubqueryType::Exists;
        let corr_exprs = collect_corr_filters(&sub_root);
        let col_ref = self.subquery_column(subquery_index)?;
        if corr_exprs.is_empty() {
            // With no correlation the join has no key; a single witness row
            // is enough for an existence check.
            let right = if distinct_inner {
                self.limit_one(sub_root)
            } else {
                sub_root
            };
            let new_root = LogicalOperator::Join(LogicalJoin {
                join_typ: JoinType::Inner,
                on_conds: Vec::new(),
                left: Box::new(root),
                right: Box::new(right),
            });
            return Ok((col_ref, new_root));
        }

        let mut corr_cols: Vec<Expr> = Vec::new();
        for corr in &corr_exprs {
            let mut cols = Vec::new();
            corr.collect_corr_columns(&mut cols);
            for col in cols {
                let plain = col.decorrelated();
                if !corr_cols.iter().any(|c| c.kind == plain.kind) {
                    corr_cols.push(plain);
                }
            }
        }
        let new_root =
            self.apply_impl(&corr_exprs, &corr_cols, root, sub_root, distinct_inner)?;
        Ok((col_ref, new_root))
    }

    fn subquery_column(&self, subquery_index: usize) -> Result<Expr> {
        let sub = &self.subqueries[subquery_index];
        let proj0 = sub
            .project_exprs
            .first()
            .ok_or_else(|| Error::internal("subquery without projections"))?;
        let name = proj0
            .alias
            .clone()
            .unwrap_or_else(|| proj0.to_string());
        Ok(Expr::column(
            "",
            &name,
            (sub.project_tag, 0),
            0,
            proj0.data_typ,
        ))
    }

    fn apply_impl(
        &mut self,
        corr_exprs: &[Expr],
        corr_cols: &[Expr],
        outer: LogicalOperator,
        sub_root: LogicalOperator,
        distinct_inner: bool,
    ) -> Result<LogicalOperator> {
        if !has_corr_col_in_plan(&sub_root)? {
            // The remaining inner subtree is correlation-free: join it with
            // the outer plan on the decorrelated conjuncts.
            let (decorrelated, residual) = remove_corr_exprs(corr_exprs);
            let right = if distinct_inner {
                self.distinct_inner_side(&decorrelated, sub_root)?
            } else {
                sub_root
            };
            let mut new_root = LogicalOperator::Join(LogicalJoin {
                join_typ: JoinType::Inner,
                on_conds: decorrelated,
                left: Box::new(outer),
                right: Box::new(right),
            });
            if !residual.is_empty() {
                new_root = LogicalOperator::Filter(LogicalFilter {
                    filters: residual,
                    child: Box::new(new_root),
                });
            }
            return Ok(new_root);
        }

        match sub_root {
            LogicalOperator::Project(mut project) => {
                for proj in &project.projects {
                    if proj.has_corr_col() {
                        return Err(Error::internal(
                            "correlated column in a project list during APPLY",
                        ));
                    }
                }
                // Preserve the duplicated outer columns through the lift.
                project.projects.extend(corr_cols.iter().cloned());
                let child = std::mem::replace(
                    &mut project.child,
                    Box::new(dummy_scan()),
                );
                project.child = Box::new(self.apply_impl(
                    corr_exprs,
                    corr_cols,
                    outer,
                    *child,
                    distinct_inner,
                )?);
                Ok(LogicalOperator::Project(project))
            }
            LogicalOperator::AggGroup(mut agg) => {
                for by in &agg.group_bys {
                    if by.has_corr_col() {
                        return Err(Error::internal(
                            "correlated column in a group key during APPLY",
                        ));
                    }
                }
                agg.group_bys.extend(corr_cols.iter().cloned());
                let child = std::mem::replace(&mut agg.child, Box::new(dummy_scan()));
                // The aggregation itself collapses the inner side per key
                // once the correlated columns join its group list.
                agg.child =
                    Box::new(self.apply_impl(corr_exprs, corr_cols, outer, *child, false)?);
                Ok(LogicalOperator::AggGroup(agg))
            }
            LogicalOperator::Filter(mut filter) => {
                // Correlated conjuncts move into the join built at the base
                // of the recursion; only the plain ones stay here.
                let (_corr, plain): (Vec<Expr>, Vec<Expr>) = filter
                    .filters
                    .into_iter()
                    .partition(|f| f.has_corr_col());
                if distinct_inner && !has_corr_col_in_plan(&filter.child)? {
                    // Keep the plain inner predicates beneath the existence
                    // dedup so a key survives only through qualifying rows.
                    let child =
                        *std::mem::replace(&mut filter.child, Box::new(dummy_scan()));
                    let inner = if plain.is_empty() {
                        child
                    } else {
                        LogicalOperator::Filter(LogicalFilter {
                            filters: plain,
                            child: Box::new(child),
                        })
                    };
                    return self.apply_impl(corr_exprs, corr_cols, outer, inner, true);
                }
                let child = std::mem::replace(&mut filter.child, Box::new(dummy_scan()));
                let new_child =
                    self.apply_impl(corr_exprs, corr_cols, outer, *child, distinct_inner)?;
                if plain.is_empty() {
                    Ok(new_child)
                } else {
                    filter.filters = plain;
                    filter.child = Box::new(new_child);
                    Ok(LogicalOperator::Filter(filter))
                }
            }
            other => Ok(other),
        }
    }

    /// Collapse a correlation-free inner side to one row per join key so an
    /// existence check never multiplies outer rows. With no inner key a
    /// single witness row suffices.
    fn distinct_inner_side(
        &mut self,
        join_conds: &[Expr],
        inner: LogicalOperator,
    ) -> Result<LogicalOperator> {
        let mut inner_tags = FxHashSet::default();
        inner.collect_tags(&mut inner_tags);
        let mut keys: Vec<Expr> = Vec::new();
        for cond in join_conds {
            let mut columns = Vec::new();
            cond.collect_columns(&mut columns);
            for col in columns {
                let Some((tag, _)) = col.col_ref() else {
                    continue;
                };
                if inner_tags.contains(&tag)
                    && !keys.iter().any(|k| k.col_ref() == col.col_ref())
                {
                    keys.push(col.clone());
                }
            }
        }
        if keys.is_empty() {
            return Ok(self.limit_one(inner));
        }
        Ok(LogicalOperator::AggGroup(LogicalAggGroup {
            index: self.get_tag(),
            index2: self.get_tag(),
            aggs: Vec::new(),
            group_bys: keys,
            filters: Vec::new(),
            child: Box::new(inner),
        }))
    }

    fn limit_one(&self, child: LogicalOperator) -> LogicalOperator {
        LogicalOperator::Limit(LogicalLimit {
            limit: Expr::new(ExprKind::IntConst(1), LType::integer()),
            child: Box::new(child),
        })
    }
}

fn create_from(expr: &FromExpr) -> LogicalOperator {
    match expr {
        FromExpr::Table {
            index,
            database,
            table,
        } => LogicalOperator::Scan(LogicalScan {
            index: *index,
            database: database.clone(),
            table: table.clone(),
            filters: Vec::new(),
        }),
        FromExpr::Join {
            join_typ,
            on_conds,
            left,
            right,
        } => LogicalOperator::Join(LogicalJoin {
            join_typ: *join_typ,
            on_conds: on_conds.clone(),
            left: Box::new(create_from(left)),
            right: Box::new(create_from(right)),
        }),
    }
}

fn dummy_scan() -> LogicalOperator {
    LogicalOperator::Scan(LogicalScan {
        index: 0,
        database: String::new(),
        table: String::new(),
        filters: Vec::new(),
    })
}

/// Collect all filter conjuncts containing a correlated column, without
/// removing them.
fn collect_corr_filters(root: &LogicalOperator) -> Vec<Expr> {
    let mut ret = Vec::new();
    for child in root.children() {
        ret.extend(collect_corr_filters(child));
    }
    if let LogicalOperator::Filter(filter) = root {
        for f in &filter.filters {
            if f.has_corr_col() {
                ret.push(f.clone());
            }
        }
    }
    ret
}

/// True when the plan still holds a correlated filter. Correlated columns in
/// a project list or group key are plan-invariant violations.
fn has_corr_col_in_plan(root: &LogicalOperator) -> Result<bool> {
    match root {
        LogicalOperator::Project(project) => {
            for proj in &project.projects {
                if proj.has_corr_col() {
                    return Err(Error::internal(
                        "correlated column in a project list during APPLY",
                    ));
                }
            }
        }
        LogicalOperator::AggGroup(agg) => {
            for by in &agg.group_bys {
                if by.has_corr_col() {
                    return Err(Error::internal(
                        "correlated column in a group key during APPLY",
                    ));
                }
            }
        }
        LogicalOperator::Filter(filter) => {
            if filter.filters.iter().any(|f| f.has_corr_col()) {
                return Ok(true);
            }
        }
        _ => {}
    }
    for child in root.children() {
        if has_corr_col_in_plan(child)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Split correlated conjuncts into fully-decorrelated join conditions and
/// residual predicates that still reach further out.
fn remove_corr_exprs(corr_exprs: &[Expr]) -> (Vec<Expr>, Vec<Expr>) {
    let mut decorrelated = Vec::new();
    let mut residual = Vec::new();
    for expr in corr_exprs {
        if max_corr_depth(expr) <= 1 {
            decorrelated.push(expr.decorrelated());
        } else {
            residual.push(expr.clone());
        }
    }
    (decorrelated, residual)
}

fn max_corr_depth(expr: &Expr) -> usize {
    match &expr.kind {
        ExprKind::Column { depth, .. } => *depth,
        _ => expr
            .children()
            .iter()
            .map(|c| max_corr_depth(c))
            .max()
            .unwrap_or(0),
    }
}
