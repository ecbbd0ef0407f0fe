//! Rule-based optimization: predicate pushdown and the join-order pass.

use quiver_expr::{split_expr_by_and, split_exprs_by_and, Expr};
use quiver_result::{Error, Result};
use rustc_hash::FxHashSet;

use crate::joinorder::{JoinRelationSetManager, QueryGraph};
use crate::logical::{JoinType, LogicalFilter, LogicalOperator};

const NONE_SIDE: u8 = 0;
const LEFT_SIDE: u8 = 1 << 1;
const RIGHT_SIDE: u8 = 1 << 2;
const BOTH_SIDE: u8 = LEFT_SIDE | RIGHT_SIDE;

/// Optimize a logical plan: push filters to their lowest legal position,
/// then run the join-order pass.
pub fn optimize(root: LogicalOperator) -> Result<LogicalOperator> {
    let (mut root, leftover) = pushdown_filters(root, Vec::new())?;
    if !leftover.is_empty() {
        root = LogicalOperator::Filter(LogicalFilter {
            filters: leftover,
            child: Box::new(root),
        });
    }
    let root = join_order(root)?;
    Ok(root)
}

/// Push `filters` down through `root`. Returns the rewritten operator and the
/// predicates that could not be pushed anywhere below it.
pub fn pushdown_filters(
    root: LogicalOperator,
    filters: Vec<Expr>,
) -> Result<(LogicalOperator, Vec<Expr>)> {
    let mut leftover = Vec::new();
    let root = match root {
        LogicalOperator::Scan(mut scan) => {
            for f in filters {
                // Only predicates that reference this scan alone may land on
                // it.
                if f.only_refers_to(scan.index) {
                    scan.filters.push(f);
                } else {
                    leftover.push(f);
                }
            }
            LogicalOperator::Scan(scan)
        }
        LogicalOperator::Filter(filter) => {
            let mut needs = filters;
            for f in &filter.filters {
                needs.extend(split_expr_by_and(f));
            }
            let (child, child_left) = pushdown_filters(*filter.child, needs)?;
            if child_left.is_empty() {
                // The child absorbed everything; drop this Filter node.
                child
            } else {
                LogicalOperator::Filter(LogicalFilter {
                    filters: child_left,
                    child: Box::new(child),
                })
            }
        }
        LogicalOperator::Join(mut join) => {
            let mut left_tags = FxHashSet::default();
            let mut right_tags = FxHashSet::default();
            join.left.collect_tags(&mut left_tags);
            join.right.collect_tags(&mut right_tags);

            let mut needs = filters;
            join.on_conds = split_exprs_by_and(&join.on_conds);
            if join.join_typ == JoinType::Inner {
                // Inner join conditions rejoin the pushdown set and are
                // reclassified below.
                needs.append(&mut join.on_conds);
            }

            let mut left_needs = Vec::new();
            let mut right_needs = Vec::new();
            for nd in needs {
                match decide_side(&nd, &left_tags, &right_tags) {
                    NONE_SIDE => match join.join_typ {
                        JoinType::Inner => {
                            left_needs.push(nd.clone());
                            right_needs.push(nd);
                        }
                        JoinType::Left => left_needs.push(nd),
                    },
                    LEFT_SIDE => left_needs.push(nd),
                    RIGHT_SIDE => right_needs.push(nd),
                    BOTH_SIDE => {
                        if join.join_typ == JoinType::Inner {
                            join.on_conds.push(nd);
                        } else {
                            leftover.push(nd);
                        }
                    }
                    side => {
                        return Err(Error::internal(format!("unexpected side {side}")));
                    }
                }
            }

            let (left, left_left) = pushdown_filters(*join.left, left_needs)?;
            join.left = Box::new(wrap_filter(left, left_left));
            let (right, right_left) = pushdown_filters(*join.right, right_needs)?;
            join.right = Box::new(wrap_filter(right, right_left));
            LogicalOperator::Join(join)
        }
        LogicalOperator::AggGroup(mut agg) => {
            let mut needs = Vec::new();
            for f in filters {
                if f.refers_to(agg.index2) {
                    // Predicates over aggregate outputs stay here as the
                    // HAVING-like post-filter.
                    agg.filters.push(f);
                } else {
                    needs.push(f.restore(agg.index, &agg.group_bys));
                }
            }
            let (child, child_left) = pushdown_filters(*agg.child, needs)?;
            agg.child = Box::new(wrap_filter(child, child_left));
            LogicalOperator::AggGroup(agg)
        }
        LogicalOperator::Project(mut project) => {
            // Substitute projected columns by their defining expressions and
            // keep pushing.
            let needs: Vec<Expr> = filters
                .into_iter()
                .map(|f| f.restore(project.index, &project.projects))
                .collect();
            let (child, child_left) = pushdown_filters(*project.child, needs)?;
            project.child = Box::new(wrap_filter(child, child_left));
            LogicalOperator::Project(project)
        }
        LogicalOperator::Limit(mut limit) => {
            // Filters do not move through LIMIT.
            leftover = filters;
            let (child, child_left) = pushdown_filters(*limit.child, Vec::new())?;
            limit.child = Box::new(wrap_filter(child, child_left));
            LogicalOperator::Limit(limit)
        }
        LogicalOperator::Order(mut order) => {
            let (child, child_left) = pushdown_filters(*order.child, filters)?;
            order.child = Box::new(wrap_filter(child, child_left));
            LogicalOperator::Order(order)
        }
    };
    Ok((root, leftover))
}

fn wrap_filter(child: LogicalOperator, leftover: Vec<Expr>) -> LogicalOperator {
    if leftover.is_empty() {
        child
    } else {
        LogicalOperator::Filter(LogicalFilter {
            filters: leftover,
            child: Box::new(child),
        })
    }
}

fn decide_side(expr: &Expr, left_tags: &FxHashSet<u64>, right_tags: &FxHashSet<u64>) -> u8 {
    let mut refs = Vec::new();
    expr.collect_col_refs(&mut refs);
    let mut side = NONE_SIDE;
    for (tag, _) in refs {
        if left_tags.contains(&tag) {
            side |= LEFT_SIDE;
        }
        if right_tags.contains(&tag) {
            side |= RIGHT_SIDE;
        }
    }
    side
}

/// Join-order pass: build the query graph over the join tree and memoize
/// relation sets. The final DP/greedy enumeration is not wired yet, so the
/// plan passes through unchanged.
pub fn join_order(root: LogicalOperator) -> Result<LogicalOperator> {
    let mut manager = JoinRelationSetManager::default();
    let mut graph = QueryGraph::default();
    collect_join_edges(&root, &mut manager, &mut graph);
    if !graph.is_empty() {
        tracing::debug!(target: "quiver::optimizer", graph = %graph, "join-order graph");
    }
    Ok(root)
}

fn collect_join_edges(
    op: &LogicalOperator,
    manager: &mut JoinRelationSetManager,
    graph: &mut QueryGraph,
) {
    if let LogicalOperator::Join(join) = op {
        let mut left_tags = FxHashSet::default();
        let mut right_tags = FxHashSet::default();
        join.left.collect_tags(&mut left_tags);
        join.right.collect_tags(&mut right_tags);
        for cond in &join.on_conds {
            let mut refs = Vec::new();
            cond.collect_col_refs(&mut refs);
            let left_set: Vec<u64> = refs
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| left_tags.contains(t))
                .collect();
            let right_set: Vec<u64> = refs
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| right_tags.contains(t))
                .collect();
            if left_set.is_empty() || right_set.is_empty() {
                continue;
            }
            let from = manager.get_relation(&left_set);
            let to = manager.get_relation(&right_set);
            graph.create_edge(&from, &to, Some(cond.clone()));
        }
    }
    for child in op.children() {
        collect_join_edges(child, manager, graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Builder;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn optimized(sql: &str) -> LogicalOperator {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        let query = match statements.into_iter().next().unwrap() {
            Statement::Query(q) => *q,
            other => panic!("expected query, got {other:?}"),
        };
        let mut builder = Builder::new();
        builder.build_select(&query, None).unwrap();
        let root = builder.create_plan().unwrap();
        optimize(root).unwrap()
    }

    fn scans(op: &LogicalOperator, out: &mut Vec<(String, usize)>) {
        if let LogicalOperator::Scan(scan) = op {
            out.push((scan.table.clone(), scan.filters.len()));
        }
        for child in op.children() {
            scans(child, out);
        }
    }

    fn count_filters(op: &LogicalOperator) -> usize {
        let mut n = usize::from(matches!(op, LogicalOperator::Filter(_)));
        for child in op.children() {
            n += count_filters(child);
        }
        n
    }

    #[test]
    fn single_table_predicates_land_on_the_scan() {
        let root = optimized("SELECT n_name FROM nation WHERE n_regionkey = 1 AND n_nationkey > 2");
        let mut s = Vec::new();
        scans(&root, &mut s);
        assert_eq!(s, vec![("nation".to_string(), 2)]);
        assert_eq!(count_filters(&root), 0, "filter node should be dropped:\n{root}");
    }

    #[test]
    fn join_predicates_split_by_side_and_become_on_conditions() {
        let root = optimized(
            "SELECT s_name FROM supplier s, nation n \
             WHERE s.s_nationkey = n.n_nationkey AND n.n_name = 'CANADA'",
        );
        let mut s = Vec::new();
        scans(&root, &mut s);
        // The nation-only predicate reached the nation scan.
        assert!(s.contains(&("nation".to_string(), 1)), "{s:?}");
        assert!(s.contains(&("supplier".to_string(), 0)), "{s:?}");
        fn find_join(op: &LogicalOperator) -> Option<&crate::logical::LogicalJoin> {
            if let LogicalOperator::Join(j) = op {
                return Some(j);
            }
            op.children().into_iter().find_map(find_join)
        }
        let join = find_join(&root).expect("join survives");
        assert_eq!(join.on_conds.len(), 1, "both-side predicate becomes ON");
    }

    #[test]
    fn pushdown_is_idempotent() {
        let sql = "SELECT s_name FROM supplier s, nation n \
                   WHERE s.s_nationkey = n.n_nationkey AND n.n_name = 'CANADA'";
        let once = optimized(sql);
        let (twice, leftover) = pushdown_filters(once.clone(), Vec::new()).unwrap();
        assert!(leftover.is_empty());
        assert_eq!(format!("{once}"), format!("{twice}"));
    }

    #[test]
    fn filters_do_not_cross_limit() {
        // A filter above a LIMIT must stay above it; only the WHERE below
        // the limit moves. Build the shape directly: the planner never puts
        // Filter above Limit for plain SELECT, so construct it here.
        let inner = optimized("SELECT n_name, n_regionkey FROM nation LIMIT 5");
        let pred = {
            use quiver_expr::{Expr, FuncSub};
            use quiver_types::LType;
            Expr::func(
                FuncSub::Equal,
                vec![
                    Expr::column("p", "n_regionkey", (1, 2), 0, LType::integer()),
                    Expr::new(quiver_expr::ExprKind::IntConst(1), LType::integer()),
                ],
                LType::boolean(),
            )
        };
        let (root, leftover) = pushdown_filters(inner, vec![pred]).unwrap();
        // Limit is somewhere in the tree and the predicate did not reach the
        // scan below it.
        assert_eq!(leftover.len(), 1);
        let mut s = Vec::new();
        scans(&root, &mut s);
        assert_eq!(s, vec![("nation".to_string(), 0)]);
    }

    #[test]
    fn no_dangling_columns_after_optimization() {
        use quiver_expr::ColRef;
        use rustc_hash::FxHashSet;
        let root = optimized(
            "SELECT n_name, count(*) AS cnt FROM nation WHERE n_regionkey = 1 \
             GROUP BY n_name ORDER BY n_name",
        );
        let mut tags = FxHashSet::default();
        root.collect_tags(&mut tags);
        fn walk(op: &LogicalOperator, refs: &mut Vec<ColRef>) {
            for e in op.exprs() {
                e.collect_col_refs(refs);
            }
            for c in op.children() {
                walk(c, refs);
            }
        }
        let mut refs = Vec::new();
        walk(&root, &mut refs);
        // Group/aggregate/project tags are produced by their operators and
        // live in the tag set; every referenced tag must appear there.
        for (tag, _) in refs {
            assert!(tags.contains(&tag), "dangling tag {tag} in:\n{root}");
        }
    }
}
