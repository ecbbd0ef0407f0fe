//! Physical plan: one-to-one lowering of logical operators with column
//! pruning and output-slot assignment.
//!
//! Each physical operator carries an ordered output `layout` of
//! `(relation_tag, column)` bindings plus the `outputs` expressions that
//! materialize them. The executor resolves a `Column` expression against its
//! input chunks through these layouts, so column indices never need to be
//! rewritten inside expressions.

use std::fmt;

use quiver_catalog::tpch_catalog;
use quiver_expr::{ColRef, Expr, ExprKind, FuncSub};
use quiver_result::{Error, Result};
use quiver_types::LType;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::logical::{JoinType, LogicalOperator};

/// One output slot: which relation/column it exposes and its type.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    pub tag: u64,
    pub column: usize,
    pub typ: LType,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PhysicalScan {
    pub index: u64,
    pub database: String,
    pub table: String,
    /// Columns to read from the source, in catalog order.
    pub columns: Vec<String>,
    pub column_ids: Vec<usize>,
    /// Layout of the chunk as read, before output projection.
    pub read_layout: Vec<ColumnBinding>,
    pub filters: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
}

#[derive(Debug, Clone)]
pub struct PhysicalFilter {
    pub filters: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub child: Box<PhysicalOperator>,
}

#[derive(Debug, Clone)]
pub struct PhysicalJoin {
    pub join_typ: JoinType,
    /// Probe-side (left) key expressions, position-aligned with
    /// `right_keys`.
    pub left_keys: Vec<Expr>,
    /// Build-side (right) key expressions.
    pub right_keys: Vec<Expr>,
    /// Non-equi conditions evaluated against the combined match chunk.
    pub residual: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub left: Box<PhysicalOperator>,
    pub right: Box<PhysicalOperator>,
}

#[derive(Debug, Clone)]
pub struct PhysicalProject {
    pub index: u64,
    pub projects: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub child: Box<PhysicalOperator>,
}

#[derive(Debug, Clone)]
pub struct PhysicalAggGroup {
    pub index: u64,
    pub index2: u64,
    pub aggs: Vec<Expr>,
    pub group_bys: Vec<Expr>,
    pub filters: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub child: Box<PhysicalOperator>,
}

#[derive(Debug, Clone)]
pub struct PhysicalOrder {
    pub order_bys: Vec<Expr>,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub child: Box<PhysicalOperator>,
}

#[derive(Debug, Clone)]
pub struct PhysicalLimit {
    pub limit: Expr,
    pub outputs: Vec<Expr>,
    pub layout: Vec<ColumnBinding>,
    pub child: Box<PhysicalOperator>,
}

/// Physical operator tree, mirroring the logical tree one-to-one.
#[derive(Debug, Clone)]
pub enum PhysicalOperator {
    Scan(PhysicalScan),
    Filter(PhysicalFilter),
    Join(PhysicalJoin),
    Project(PhysicalProject),
    AggGroup(PhysicalAggGroup),
    Order(PhysicalOrder),
    Limit(PhysicalLimit),
}

impl PhysicalOperator {
    pub fn layout(&self) -> &[ColumnBinding] {
        match self {
            PhysicalOperator::Scan(op) => &op.layout,
            PhysicalOperator::Filter(op) => &op.layout,
            PhysicalOperator::Join(op) => &op.layout,
            PhysicalOperator::Project(op) => &op.layout,
            PhysicalOperator::AggGroup(op) => &op.layout,
            PhysicalOperator::Order(op) => &op.layout,
            PhysicalOperator::Limit(op) => &op.layout,
        }
    }

    pub fn output_types(&self) -> Vec<LType> {
        self.layout().iter().map(|b| b.typ).collect()
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        let describe = |layout: &[ColumnBinding]| {
            layout
                .iter()
                .map(|b| format!("{}[{}.{}]", b.name, b.tag, b.column))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            PhysicalOperator::Scan(op) => {
                writeln!(
                    f,
                    "{pad}Scan [{}] {}.{} read: {} -> {}",
                    op.index,
                    op.database,
                    op.table,
                    op.columns.join(", "),
                    describe(&op.layout)
                )?;
            }
            PhysicalOperator::Filter(op) => {
                writeln!(f, "{pad}Filter -> {}", describe(&op.layout))?;
                op.child.fmt_node(f, indent + 1)?;
            }
            PhysicalOperator::Join(op) => {
                writeln!(
                    f,
                    "{pad}Join ({}) keys: {} -> {}",
                    op.join_typ,
                    op.left_keys.len(),
                    describe(&op.layout)
                )?;
                op.left.fmt_node(f, indent + 1)?;
                op.right.fmt_node(f, indent + 1)?;
            }
            PhysicalOperator::Project(op) => {
                writeln!(f, "{pad}Project [{}] -> {}", op.index, describe(&op.layout))?;
                op.child.fmt_node(f, indent + 1)?;
            }
            PhysicalOperator::AggGroup(op) => {
                writeln!(
                    f,
                    "{pad}AggGroup [{}/{}] -> {}",
                    op.index,
                    op.index2,
                    describe(&op.layout)
                )?;
                op.child.fmt_node(f, indent + 1)?;
            }
            PhysicalOperator::Order(op) => {
                writeln!(f, "{pad}Order -> {}", describe(&op.layout))?;
                op.child.fmt_node(f, indent + 1)?;
            }
            PhysicalOperator::Limit(op) => {
                writeln!(f, "{pad}Limit -> {}", describe(&op.layout))?;
                op.child.fmt_node(f, indent + 1)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, 0)
    }
}

type TagInfo = FxHashMap<u64, Vec<(LType, String)>>;

/// Lower a logical plan. `root_needed` lists the `(tag, column)` pairs the
/// caller wants emitted, in order; for a full query that is the project tag's
/// columns.
pub fn create_physical_plan(
    root: &LogicalOperator,
    root_needed: &[ColRef],
) -> Result<PhysicalOperator> {
    let mut info = TagInfo::default();
    collect_tag_info(root, &mut info)?;
    lower(root, root_needed.to_vec(), &info)
}

fn collect_tag_info(op: &LogicalOperator, info: &mut TagInfo) -> Result<()> {
    match op {
        LogicalOperator::Scan(scan) => {
            let def = tpch_catalog().table(&scan.database, &scan.table)?;
            info.insert(
                scan.index,
                def.types
                    .iter()
                    .zip(def.columns.iter())
                    .map(|(t, n)| (*t, n.clone()))
                    .collect(),
            );
        }
        LogicalOperator::Project(project) => {
            info.insert(
                project.index,
                project
                    .projects
                    .iter()
                    .map(|p| (p.data_typ, display_name(p)))
                    .collect(),
            );
        }
        LogicalOperator::AggGroup(agg) => {
            info.insert(
                agg.index,
                agg.group_bys
                    .iter()
                    .map(|g| (g.data_typ, display_name(g)))
                    .collect(),
            );
            info.insert(
                agg.index2,
                agg.aggs
                    .iter()
                    .map(|a| (a.data_typ, display_name(a)))
                    .collect(),
            );
        }
        _ => {}
    }
    for child in op.children() {
        collect_tag_info(child, info)?;
    }
    Ok(())
}

fn display_name(expr: &Expr) -> String {
    expr.alias.clone().unwrap_or_else(|| expr.to_string())
}

fn binding_for(info: &TagInfo, col_ref: ColRef) -> Result<ColumnBinding> {
    let (tag, column) = col_ref;
    let columns = info
        .get(&tag)
        .ok_or_else(|| Error::internal(format!("column references unknown relation tag {tag}")))?;
    let (typ, name) = columns.get(column).ok_or_else(|| {
        Error::internal(format!(
            "column {column} out of range for relation tag {tag} ({} columns)",
            columns.len()
        ))
    })?;
    Ok(ColumnBinding {
        tag,
        column,
        typ: *typ,
        name: name.clone(),
    })
}

fn outputs_for(needed: &[ColRef], info: &TagInfo) -> Result<(Vec<Expr>, Vec<ColumnBinding>)> {
    let mut outputs = Vec::with_capacity(needed.len());
    let mut layout = Vec::with_capacity(needed.len());
    for &col_ref in needed {
        let binding = binding_for(info, col_ref)?;
        outputs.push(Expr::column(
            "",
            &binding.name,
            col_ref,
            0,
            binding.typ,
        ));
        layout.push(binding);
    }
    Ok((outputs, layout))
}

fn merge_refs(base: &mut Vec<ColRef>, extra: impl IntoIterator<Item = ColRef>) {
    for r in extra {
        if !base.contains(&r) {
            base.push(r);
        }
    }
}

fn expr_refs(exprs: &[Expr]) -> Vec<ColRef> {
    let mut refs = Vec::new();
    for e in exprs {
        e.collect_col_refs(&mut refs);
    }
    let mut out = Vec::new();
    merge_refs(&mut out, refs);
    out
}

fn lower(op: &LogicalOperator, needed: Vec<ColRef>, info: &TagInfo) -> Result<PhysicalOperator> {
    match op {
        LogicalOperator::Scan(scan) => {
            let mut read = needed.clone();
            merge_refs(&mut read, expr_refs(&scan.filters));
            for &(tag, _) in &read {
                if tag != scan.index {
                    return Err(Error::internal(format!(
                        "scan of {} asked for relation tag {tag}",
                        scan.table
                    )));
                }
            }
            // Read in catalog order so the row decoders line up.
            read.sort_by_key(|&(_, col)| col);
            let mut columns = Vec::with_capacity(read.len());
            let mut column_ids = Vec::with_capacity(read.len());
            let mut read_layout = Vec::with_capacity(read.len());
            for &col_ref in &read {
                let binding = binding_for(info, col_ref)?;
                columns.push(binding.name.clone());
                column_ids.push(col_ref.1);
                read_layout.push(binding);
            }
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Scan(PhysicalScan {
                index: scan.index,
                database: scan.database.clone(),
                table: scan.table.clone(),
                columns,
                column_ids,
                read_layout,
                filters: scan.filters.clone(),
                outputs,
                layout,
            }))
        }
        LogicalOperator::Filter(filter) => {
            let mut child_needed = needed.clone();
            merge_refs(&mut child_needed, expr_refs(&filter.filters));
            let child = lower(&filter.child, child_needed, info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Filter(PhysicalFilter {
                filters: filter.filters.clone(),
                outputs,
                layout,
                child: Box::new(child),
            }))
        }
        LogicalOperator::Join(join) => {
            let mut left_tags = FxHashSet::default();
            let mut right_tags = FxHashSet::default();
            join.left.collect_tags(&mut left_tags);
            join.right.collect_tags(&mut right_tags);

            let mut left_keys = Vec::new();
            let mut right_keys = Vec::new();
            let mut residual = Vec::new();
            for cond in &join.on_conds {
                match split_equi_condition(cond, &left_tags, &right_tags) {
                    Some((l, r)) => {
                        left_keys.push(l);
                        right_keys.push(r);
                    }
                    None => residual.push(cond.clone()),
                }
            }

            let mut all_needed = needed.clone();
            merge_refs(&mut all_needed, expr_refs(&residual));
            let mut left_needed = Vec::new();
            let mut right_needed = Vec::new();
            for &(tag, col) in &all_needed {
                if left_tags.contains(&tag) {
                    merge_refs(&mut left_needed, [(tag, col)]);
                } else if right_tags.contains(&tag) {
                    merge_refs(&mut right_needed, [(tag, col)]);
                } else {
                    return Err(Error::internal(format!(
                        "join output references relation tag {tag} from neither side"
                    )));
                }
            }
            merge_refs(&mut left_needed, expr_refs(&left_keys));
            merge_refs(&mut right_needed, expr_refs(&right_keys));

            let left = lower(&join.left, left_needed, info)?;
            let right = lower(&join.right, right_needed, info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Join(PhysicalJoin {
                join_typ: join.join_typ,
                left_keys,
                right_keys,
                residual,
                outputs,
                layout,
                left: Box::new(left),
                right: Box::new(right),
            }))
        }
        LogicalOperator::Project(project) => {
            let mut child_needed = expr_refs(&project.projects);
            // Pass-through references keep their original tags; demand them
            // from the child alongside the projection inputs.
            for &(tag, col) in &needed {
                if tag != project.index {
                    merge_refs(&mut child_needed, [(tag, col)]);
                }
            }
            let child = lower(&project.child, child_needed, info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Project(PhysicalProject {
                index: project.index,
                projects: project.projects.clone(),
                outputs,
                layout,
                child: Box::new(child),
            }))
        }
        LogicalOperator::AggGroup(agg) => {
            let mut child_needed = expr_refs(&agg.group_bys);
            let mut param_refs = Vec::new();
            for a in &agg.aggs {
                a.collect_col_refs(&mut param_refs);
            }
            merge_refs(&mut child_needed, param_refs);
            for &(tag, col) in &needed {
                if tag == agg.index2 {
                    continue;
                }
                if tag == agg.index {
                    return Err(Error::internal(
                        "group-tag reference survived predicate restoration",
                    ));
                }
                merge_refs(&mut child_needed, [(tag, col)]);
            }
            // The HAVING-like filter runs against (child, _, aggregate
            // states); its child-side references must be readable too.
            for f in &agg.filters {
                for (tag, col) in expr_refs(std::slice::from_ref(f)) {
                    if tag != agg.index2 {
                        merge_refs(&mut child_needed, [(tag, col)]);
                    }
                }
            }
            let child = lower(&agg.child, child_needed, info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::AggGroup(PhysicalAggGroup {
                index: agg.index,
                index2: agg.index2,
                aggs: agg.aggs.clone(),
                group_bys: agg.group_bys.clone(),
                filters: agg.filters.clone(),
                outputs,
                layout,
                child: Box::new(child),
            }))
        }
        LogicalOperator::Order(order) => {
            let mut child_needed = needed.clone();
            for ob in &order.order_bys {
                match &ob.kind {
                    ExprKind::OrderBy { child, .. } => {
                        merge_refs(
                            &mut child_needed,
                            expr_refs(std::slice::from_ref(child.as_ref())),
                        );
                    }
                    _ => {
                        merge_refs(&mut child_needed, expr_refs(std::slice::from_ref(ob)));
                    }
                }
            }
            let child = lower(&order.child, child_needed, info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Order(PhysicalOrder {
                order_bys: order.order_bys.clone(),
                outputs,
                layout,
                child: Box::new(child),
            }))
        }
        LogicalOperator::Limit(limit) => {
            let child = lower(&limit.child, needed.clone(), info)?;
            let (outputs, layout) = outputs_for(&needed, info)?;
            Ok(PhysicalOperator::Limit(PhysicalLimit {
                limit: limit.limit.clone(),
                outputs,
                layout,
                child: Box::new(child),
            }))
        }
    }
}

/// Split an equality condition into (left-side, right-side) key expressions,
/// or `None` if it is not a two-sided equi-condition.
fn split_equi_condition(
    cond: &Expr,
    left_tags: &FxHashSet<u64>,
    right_tags: &FxHashSet<u64>,
) -> Option<(Expr, Expr)> {
    let ExprKind::Func {
        sub: FuncSub::Equal,
        children,
        ..
    } = &cond.kind
    else {
        return None;
    };
    let [a, b] = children.as_slice() else {
        return None;
    };
    let side = |e: &Expr| -> (bool, bool) {
        let refs = expr_refs(std::slice::from_ref(e));
        let on_left = refs.iter().any(|(t, _)| left_tags.contains(t));
        let on_right = refs.iter().any(|(t, _)| right_tags.contains(t));
        (on_left, on_right)
    };
    match (side(a), side(b)) {
        ((true, false), (false, true)) => Some((a.clone(), b.clone())),
        ((false, true), (true, false)) => Some((b.clone(), a.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Builder;
    use crate::optimizer::optimize;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn physical(sql: &str) -> (Builder, PhysicalOperator) {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        let query = match statements.into_iter().next().unwrap() {
            Statement::Query(q) => *q,
            other => panic!("expected query, got {other:?}"),
        };
        let mut builder = Builder::new();
        builder.build_select(&query, None).unwrap();
        let root = builder.create_plan().unwrap();
        let root = optimize(root).unwrap();
        let needed: Vec<ColRef> = (0..builder.column_count)
            .map(|i| (builder.project_tag, i))
            .collect();
        let plan = create_physical_plan(&root, &needed).unwrap();
        (builder, plan)
    }

    fn find_scan<'a>(op: &'a PhysicalOperator, table: &str) -> Option<&'a PhysicalScan> {
        match op {
            PhysicalOperator::Scan(scan) if scan.table == table => Some(scan),
            PhysicalOperator::Scan(_) => None,
            PhysicalOperator::Filter(f) => find_scan(&f.child, table),
            PhysicalOperator::Join(j) => {
                find_scan(&j.left, table).or_else(|| find_scan(&j.right, table))
            }
            PhysicalOperator::Project(p) => find_scan(&p.child, table),
            PhysicalOperator::AggGroup(a) => find_scan(&a.child, table),
            PhysicalOperator::Order(o) => find_scan(&o.child, table),
            PhysicalOperator::Limit(l) => find_scan(&l.child, table),
        }
    }

    #[test]
    fn scan_reads_only_referenced_columns() {
        let (_b, plan) = physical("SELECT n_name FROM nation WHERE n_regionkey = 1");
        let scan = find_scan(&plan, "nation").unwrap();
        assert_eq!(scan.columns, vec!["n_name", "n_regionkey"]);
        assert_eq!(scan.column_ids, vec![1, 2]);
        // Only the projected column leaves the scan.
        assert_eq!(scan.layout.len(), 1);
        assert_eq!(scan.layout[0].name, "n_name");
    }

    #[test]
    fn join_keys_are_side_aligned() {
        let (_b, plan) = physical(
            "SELECT s_name FROM supplier s, nation n \
             WHERE s.s_nationkey = n.n_nationkey AND n.n_name = 'CANADA'",
        );
        fn find_join(op: &PhysicalOperator) -> Option<&PhysicalJoin> {
            match op {
                PhysicalOperator::Join(j) => Some(j),
                PhysicalOperator::Filter(f) => find_join(&f.child),
                PhysicalOperator::Project(p) => find_join(&p.child),
                PhysicalOperator::Order(o) => find_join(&o.child),
                PhysicalOperator::Limit(l) => find_join(&l.child),
                PhysicalOperator::AggGroup(a) => find_join(&a.child),
                PhysicalOperator::Scan(_) => None,
            }
        }
        let join = find_join(&plan).unwrap();
        assert_eq!(join.left_keys.len(), 1);
        assert_eq!(join.right_keys.len(), 1);
        assert!(join.residual.is_empty());
        // Probe keys reference the left subtree, build keys the right.
        let mut left_tags = FxHashSet::default();
        let mut refs = Vec::new();
        join.left_keys[0].collect_col_refs(&mut refs);
        for (t, _) in &refs {
            left_tags.insert(*t);
        }
        let mut right_refs = Vec::new();
        join.right_keys[0].collect_col_refs(&mut right_refs);
        assert!(right_refs.iter().all(|(t, _)| !left_tags.contains(t)));
    }

    #[test]
    fn aggregate_layout_exposes_child_and_agg_tags() {
        let (b, plan) = physical(
            "SELECT n_name, count(*) FROM nation WHERE n_regionkey = 1 GROUP BY n_name",
        );
        fn find_agg(op: &PhysicalOperator) -> Option<&PhysicalAggGroup> {
            match op {
                PhysicalOperator::AggGroup(a) => Some(a),
                PhysicalOperator::Filter(f) => find_agg(&f.child),
                PhysicalOperator::Project(p) => find_agg(&p.child),
                PhysicalOperator::Order(o) => find_agg(&o.child),
                PhysicalOperator::Limit(l) => find_agg(&l.child),
                PhysicalOperator::Join(j) => find_agg(&j.left).or_else(|| find_agg(&j.right)),
                PhysicalOperator::Scan(_) => None,
            }
        }
        let agg = find_agg(&plan).unwrap();
        assert_eq!(agg.layout.len(), 2);
        assert!(agg.layout.iter().any(|bind| bind.tag == b.agg_tag));
        assert!(agg.layout.iter().any(|bind| bind.tag != b.agg_tag));
    }

    #[test]
    fn correlated_subquery_lowers_without_dangling_columns() {
        let (_b, plan) = physical(
            "SELECT n_name FROM nation n WHERE n_regionkey = \
             (SELECT r_regionkey FROM region r WHERE r.r_name = n.n_name)",
        );
        // Both base tables are read; the lifted project passes the outer
        // column through.
        assert!(find_scan(&plan, "nation").is_some());
        assert!(find_scan(&plan, "region").is_some());
    }
}
