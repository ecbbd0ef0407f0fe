//! Pull-based operator driver: `init` (construction), `execute`, `close`.
//!
//! The driver pulls chunks from the root operator until `Done`. Pipelined
//! operators (scan, filter, project, limit) emit one chunk per call;
//! pipeline breakers (sort, aggregation, the join build) drain their child
//! inside `execute` before yielding anything.

use quiver_aggregate::{AggrKind, AggrScanState, AggrSpec, GlobalAggrState, GroupedHashTable};
use quiver_expr::{Expr, ExprKind, FuncId};
use quiver_join::{JoinHashTable, JoinKind, JoinScan};
use quiver_plan::physical::{
    PhysicalAggGroup, PhysicalJoin, PhysicalOrder, PhysicalScan,
};
use quiver_plan::{ColumnBinding, JoinType, PhysicalOperator};
use quiver_result::{Error, Result};
use quiver_sort::{LocalSort, PayloadScanner, RowLayout, SortColumn, SortLayout, SortState};
use quiver_types::{Chunk, SelectVector, Value, DEFAULT_VECTOR_SIZE};

use crate::config::ExecConfig;
use crate::exec::{ColumnBindings, ExprExec};
use crate::scan::TableScanner;

/// Operator return codes. Errors travel separately through `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorResult {
    /// The operator consumed input without producing output yet. Unused by
    /// the current pipeline breakers, which drain internally.
    NeedMoreInput,
    /// Call again; more output may follow.
    HaveMoreOutput,
    /// The operator is exhausted.
    Done,
}

struct ScanOpState {
    scanner: TableScanner,
    filter_exec: Option<ExprExec>,
    filter_sel: SelectVector,
    output_indices: Vec<usize>,
}

struct FilterOpState {
    filter_exec: ExprExec,
    filter_sel: SelectVector,
    output_indices: Vec<usize>,
}

struct ProjectOpState {
    proj_exec: ExprExec,
    output_exec: ExprExec,
}

#[derive(PartialEq)]
enum JoinPhase {
    Init,
    Probe,
}

struct JoinOpState {
    phase: JoinPhase,
    kind: JoinKind,
    ht: JoinHashTable,
    build_key_exec: ExprExec,
    probe_key_exec: ExprExec,
    output_exec: ExprExec,
    residual_exec: Option<ExprExec>,
    residual_sel: SelectVector,
    scan: Option<JoinScan>,
    /// Retained across calls while a probe scan is in progress.
    left_chunk: Chunk,
    left_width: usize,
}

#[derive(PartialEq)]
enum AggrPhase {
    Init,
    Scan,
}

struct AggrOpState {
    phase: AggrPhase,
    grouped: Option<GroupedHashTable>,
    global: Option<GlobalAggrState>,
    sink_exec: ExprExec,
    group_exec: ExprExec,
    filter_exec: Option<ExprExec>,
    filter_sel: SelectVector,
    output_exec: ExprExec,
    scan_state: AggrScanState,
    emitted_global: bool,
}

struct OrderOpState {
    sort: LocalSort,
    key_exec: ExprExec,
    output_exec: ExprExec,
    scanner: Option<PayloadScanner>,
}

struct LimitOpState {
    remaining: usize,
    sel: SelectVector,
}

enum OpState {
    Scan(Box<ScanOpState>),
    Filter(FilterOpState),
    Project(ProjectOpState),
    Join(Box<JoinOpState>),
    Aggr(Box<AggrOpState>),
    Order(Box<OrderOpState>),
    Limit(LimitOpState),
}

/// One operator instance plus its children, pulled by the driver.
pub struct Runner<'a> {
    op: &'a PhysicalOperator,
    config: &'a ExecConfig,
    children: Vec<Runner<'a>>,
    state: OpState,
}

impl<'a> Runner<'a> {
    /// Allocate operator-local state and recursively initialize children.
    pub fn new(op: &'a PhysicalOperator, config: &'a ExecConfig) -> Result<Self> {
        let children = match op {
            PhysicalOperator::Scan(_) => Vec::new(),
            PhysicalOperator::Filter(f) => vec![Runner::new(&f.child, config)?],
            PhysicalOperator::Project(p) => vec![Runner::new(&p.child, config)?],
            PhysicalOperator::AggGroup(a) => vec![Runner::new(&a.child, config)?],
            PhysicalOperator::Order(o) => vec![Runner::new(&o.child, config)?],
            PhysicalOperator::Limit(l) => vec![Runner::new(&l.child, config)?],
            PhysicalOperator::Join(j) => vec![
                Runner::new(&j.left, config)?,
                Runner::new(&j.right, config)?,
            ],
        };
        let state = match op {
            PhysicalOperator::Scan(scan) => OpState::Scan(Box::new(init_scan(scan, config)?)),
            PhysicalOperator::Filter(filter) => {
                let child_layout = filter.child.layout();
                let mut bindings = ColumnBindings::new();
                bindings.bind(0, child_layout);
                OpState::Filter(FilterOpState {
                    filter_exec: ExprExec::new(filter.filters.clone(), bindings),
                    filter_sel: SelectVector::with_capacity(DEFAULT_VECTOR_SIZE),
                    output_indices: output_positions(&filter.outputs, child_layout)?,
                })
            }
            PhysicalOperator::Project(project) => {
                let child_layout = project.child.layout();
                let mut proj_bindings = ColumnBindings::new();
                proj_bindings.bind(0, child_layout);
                let mut out_bindings = ColumnBindings::new();
                out_bindings.bind(0, child_layout);
                out_bindings.bind(2, &project_layout(project.index, &project.projects));
                OpState::Project(ProjectOpState {
                    proj_exec: ExprExec::new(project.projects.clone(), proj_bindings),
                    output_exec: ExprExec::new(project.outputs.clone(), out_bindings),
                })
            }
            PhysicalOperator::Join(join) => OpState::Join(Box::new(init_join(join)?)),
            PhysicalOperator::AggGroup(agg) => OpState::Aggr(Box::new(init_aggr(agg)?)),
            PhysicalOperator::Order(order) => OpState::Order(Box::new(init_order(order)?)),
            PhysicalOperator::Limit(limit) => {
                let value = ExprExec::eval_scalar(&limit.limit)?;
                let Value::Integer(n) = value else {
                    return Err(Error::invalid(format!("LIMIT {value} is not an integer")));
                };
                if n < 0 {
                    return Err(Error::invalid("negative LIMIT"));
                }
                OpState::Limit(LimitOpState {
                    remaining: n as usize,
                    sel: SelectVector::with_capacity(DEFAULT_VECTOR_SIZE),
                })
            }
        };
        Ok(Self {
            op,
            config,
            children,
            state,
        })
    }

    /// Produce the next output chunk. An empty chunk with `HaveMoreOutput`
    /// asks the caller to call again.
    pub fn execute(&mut self, output: &mut Chunk) -> Result<OperatorResult> {
        output.reset();
        let children = &mut self.children;
        match &mut self.state {
            OpState::Scan(state) => scan_execute(state, output),
            OpState::Filter(state) => filter_execute(state, children, output),
            OpState::Project(state) => project_execute(state, children, output),
            OpState::Join(state) => join_execute(state, children, output),
            OpState::Aggr(state) => {
                let PhysicalOperator::AggGroup(op) = self.op else {
                    return Err(Error::internal("aggregation state on a non-aggregate"));
                };
                aggr_execute(state, op, self.config, children, output)
            }
            OpState::Order(state) => order_execute(state, children, output),
            OpState::Limit(state) => limit_execute(state, children, output),
        }
    }

    /// Release per-operator resources, children first.
    pub fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        match &mut self.state {
            OpState::Join(state) => {
                state.scan = None;
                state.left_chunk = Chunk::empty();
            }
            OpState::Aggr(state) => {
                state.grouped = None;
                state.global = None;
            }
            OpState::Order(state) => {
                state.scanner = None;
            }
            // Scan drops its file handle with the reader.
            _ => {}
        }
    }

    /// Drive the operator to completion, collecting every non-empty chunk.
    pub fn run_to_completion(&mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        loop {
            let mut output = Chunk::empty();
            match self.execute(&mut output) {
                Ok(OperatorResult::Done) => break,
                Ok(_) => {
                    if output.card() > 0 {
                        chunks.push(output);
                    }
                }
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
        self.close();
        Ok(chunks)
    }
}

/// Pull from a child until it yields rows or finishes.
fn exec_child(child: &mut Runner<'_>, output: &mut Chunk) -> Result<OperatorResult> {
    loop {
        match child.execute(output)? {
            OperatorResult::Done => return Ok(OperatorResult::Done),
            _ => {
                if output.card() > 0 {
                    return Ok(OperatorResult::HaveMoreOutput);
                }
            }
        }
    }
}

fn output_positions(outputs: &[Expr], layout: &[ColumnBinding]) -> Result<Vec<usize>> {
    outputs
        .iter()
        .map(|out| {
            let col_ref = out
                .col_ref()
                .ok_or_else(|| Error::internal(format!("output {out} is not a column")))?;
            layout
                .iter()
                .position(|b| (b.tag, b.column) == col_ref)
                .ok_or_else(|| {
                    Error::internal(format!("output {out} is missing from the input layout"))
                })
        })
        .collect()
}

fn project_layout(tag: u64, projects: &[Expr]) -> Vec<ColumnBinding> {
    projects
        .iter()
        .enumerate()
        .map(|(i, p)| ColumnBinding {
            tag,
            column: i,
            typ: p.data_typ,
            name: p.alias.clone().unwrap_or_else(|| p.to_string()),
        })
        .collect()
}

fn slice_all(chunk: &Chunk, sel: &SelectVector, count: usize) -> Result<Chunk> {
    let indices: Vec<usize> = (0..chunk.column_count()).collect();
    Chunk::slice_indices(chunk, sel, count, &indices)
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

fn init_scan(op: &PhysicalScan, config: &ExecConfig) -> Result<ScanOpState> {
    let read_types = op.read_layout.iter().map(|b| b.typ).collect();
    let scanner = TableScanner::open(config, &op.table, op.column_ids.clone(), read_types)?;
    let filter_exec = if op.filters.is_empty() {
        None
    } else {
        let mut bindings = ColumnBindings::new();
        bindings.bind(2, &op.read_layout);
        Some(ExprExec::new(op.filters.clone(), bindings))
    };
    Ok(ScanOpState {
        scanner,
        filter_exec,
        filter_sel: SelectVector::with_capacity(DEFAULT_VECTOR_SIZE),
        output_indices: output_positions(&op.outputs, &op.read_layout)?,
    })
}

fn scan_execute(state: &mut ScanOpState, output: &mut Chunk) -> Result<OperatorResult> {
    loop {
        let read = state.scanner.read_chunk(DEFAULT_VECTOR_SIZE)?;
        if read.card() == 0 {
            return Ok(OperatorResult::Done);
        }
        // Filters run against the freshly read chunk in the extra slot.
        let survivors = match &state.filter_exec {
            Some(filter) => {
                filter.execute_select([None, None, Some(&read)], &mut state.filter_sel)?
            }
            None => read.card(),
        };
        if survivors == 0 {
            continue;
        }
        *output = if survivors == read.card() {
            Chunk::reference_indices(&read, &state.output_indices)?
        } else {
            Chunk::slice_indices(&read, &state.filter_sel, survivors, &state.output_indices)?
        };
        return Ok(OperatorResult::HaveMoreOutput);
    }
}

// ---------------------------------------------------------------------------
// Filter / Project / Limit
// ---------------------------------------------------------------------------

fn filter_execute(
    state: &mut FilterOpState,
    children: &mut [Runner<'_>],
    output: &mut Chunk,
) -> Result<OperatorResult> {
    loop {
        let mut child_chunk = Chunk::empty();
        if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
            return Ok(OperatorResult::Done);
        }
        let survivors = state
            .filter_exec
            .execute_select([Some(&child_chunk), None, None], &mut state.filter_sel)?;
        if survivors == 0 {
            continue;
        }
        *output = if survivors == child_chunk.card() {
            Chunk::reference_indices(&child_chunk, &state.output_indices)?
        } else {
            Chunk::slice_indices(
                &child_chunk,
                &state.filter_sel,
                survivors,
                &state.output_indices,
            )?
        };
        return Ok(OperatorResult::HaveMoreOutput);
    }
}

fn project_execute(
    state: &mut ProjectOpState,
    children: &mut [Runner<'_>],
    output: &mut Chunk,
) -> Result<OperatorResult> {
    let mut child_chunk = Chunk::empty();
    if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
        return Ok(OperatorResult::Done);
    }
    let proj_chunk = state
        .proj_exec
        .execute_exprs([Some(&child_chunk), None, None])?;
    *output = state
        .output_exec
        .execute_exprs([Some(&child_chunk), None, Some(&proj_chunk)])?;
    Ok(OperatorResult::HaveMoreOutput)
}

fn limit_execute(
    state: &mut LimitOpState,
    children: &mut [Runner<'_>],
    output: &mut Chunk,
) -> Result<OperatorResult> {
    if state.remaining == 0 {
        return Ok(OperatorResult::Done);
    }
    let mut child_chunk = Chunk::empty();
    if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
        state.remaining = 0;
        return Ok(OperatorResult::Done);
    }
    if child_chunk.card() <= state.remaining {
        state.remaining -= child_chunk.card();
        *output = child_chunk;
    } else {
        state.sel.clear();
        for row in 0..state.remaining {
            state.sel.push(row);
        }
        *output = slice_all(&child_chunk, &state.sel, state.remaining)?;
        state.remaining = 0;
    }
    Ok(OperatorResult::HaveMoreOutput)
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

fn init_join(op: &PhysicalJoin) -> Result<JoinOpState> {
    let left_layout = op.left.layout();
    let right_layout = op.right.layout();
    let kind = if op.left_keys.is_empty() {
        match op.join_typ {
            JoinType::Inner => JoinKind::Cross,
            JoinType::Left => {
                return Err(Error::unsupported("LEFT JOIN without an equality condition"));
            }
        }
    } else {
        match op.join_typ {
            JoinType::Inner => JoinKind::Inner,
            JoinType::Left => JoinKind::Left,
        }
    };
    if kind == JoinKind::Left && !op.residual.is_empty() {
        return Err(Error::unsupported("LEFT JOIN with a non-equality condition"));
    }

    let mut build_bindings = ColumnBindings::new();
    build_bindings.bind(0, right_layout);
    let mut probe_bindings = ColumnBindings::new();
    probe_bindings.bind(0, left_layout);
    let mut combined = ColumnBindings::new();
    combined.bind(0, left_layout);
    combined.bind(1, right_layout);

    let residual_exec = if op.residual.is_empty() {
        None
    } else {
        Some(ExprExec::new(op.residual.clone(), combined.clone()))
    };
    Ok(JoinOpState {
        phase: JoinPhase::Init,
        kind,
        ht: JoinHashTable::new(right_layout.iter().map(|b| b.typ).collect()),
        build_key_exec: ExprExec::new(op.right_keys.clone(), build_bindings),
        probe_key_exec: ExprExec::new(op.left_keys.clone(), probe_bindings),
        output_exec: ExprExec::new(op.outputs.clone(), combined),
        residual_exec,
        residual_sel: SelectVector::with_capacity(DEFAULT_VECTOR_SIZE),
        scan: None,
        left_chunk: Chunk::empty(),
        left_width: left_layout.len(),
    })
}

fn join_execute(
    state: &mut JoinOpState,
    children: &mut [Runner<'_>],
    output: &mut Chunk,
) -> Result<OperatorResult> {
    // Build the hash table on the right child first.
    if state.phase == JoinPhase::Init {
        loop {
            let mut right_chunk = Chunk::empty();
            if exec_child(&mut children[1], &mut right_chunk)? == OperatorResult::Done {
                state.ht.finalize();
                break;
            }
            let keys = if state.kind == JoinKind::Cross {
                Chunk::from_arcs(Vec::new(), right_chunk.card())
            } else {
                state
                    .build_key_exec
                    .execute_exprs([Some(&right_chunk), None, None])?
            };
            state.ht.build(&keys, &right_chunk)?;
        }
        state.phase = JoinPhase::Probe;
    }

    loop {
        // Continue an unfinished probe scan.
        if let Some(scan) = &mut state.scan {
            let next = scan.next(&state.ht, &state.left_chunk, DEFAULT_VECTOR_SIZE)?;
            if next.card() > 0 {
                emit_join_output(state, &next, output)?;
                return Ok(OperatorResult::HaveMoreOutput);
            }
            state.scan = None;
        }

        let mut left_chunk = Chunk::empty();
        if exec_child(&mut children[0], &mut left_chunk)? == OperatorResult::Done {
            return Ok(OperatorResult::Done);
        }
        let keys = if state.kind == JoinKind::Cross {
            left_chunk.clone()
        } else {
            state
                .probe_key_exec
                .execute_exprs([Some(&left_chunk), None, None])?
        };
        state.scan = Some(state.ht.probe(&keys, state.kind)?);
        state.left_chunk = left_chunk;
    }
}

fn emit_join_output(
    state: &mut JoinOpState,
    next: &Chunk,
    output: &mut Chunk,
) -> Result<OperatorResult> {
    let left_indices: Vec<usize> = (0..state.left_width).collect();
    let right_indices: Vec<usize> = (state.left_width..next.column_count()).collect();
    let mut left_part = Chunk::reference_indices(next, &left_indices)?;
    let mut right_part = Chunk::reference_indices(next, &right_indices)?;
    if let Some(residual) = &state.residual_exec {
        let survivors = residual.execute_select(
            [Some(&left_part), Some(&right_part), None],
            &mut state.residual_sel,
        )?;
        if survivors < left_part.card() {
            left_part = slice_all(&left_part, &state.residual_sel, survivors)?;
            right_part = slice_all(&right_part, &state.residual_sel, survivors)?;
        }
    }
    *output = state
        .output_exec
        .execute_exprs([Some(&left_part), Some(&right_part), None])?;
    Ok(OperatorResult::HaveMoreOutput)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn aggr_specs(aggs: &[Expr]) -> Result<(Vec<AggrSpec>, Vec<Expr>)> {
    let mut specs = Vec::with_capacity(aggs.len());
    let mut params = Vec::with_capacity(aggs.len());
    for agg in aggs {
        let ExprKind::Func {
            func: Some(id),
            children,
            ..
        } = &agg.kind
        else {
            return Err(Error::internal(format!("{agg} is not an aggregate call")));
        };
        let kind = match id {
            FuncId::Count => AggrKind::Count,
            FuncId::Sum => AggrKind::Sum,
            FuncId::Min => AggrKind::Min,
            FuncId::Max => AggrKind::Max,
            FuncId::Avg => AggrKind::Avg,
            other => {
                return Err(Error::internal(format!("{other} is not an aggregate")));
            }
        };
        let param = children
            .first()
            .ok_or_else(|| Error::internal(format!("{agg} has no parameter")))?
            .clone();
        specs.push(AggrSpec {
            kind,
            param_typ: param.data_typ,
            return_typ: agg.data_typ,
        });
        params.push(param);
    }
    Ok((specs, params))
}

fn aggr_states_layout(op: &PhysicalAggGroup) -> Vec<ColumnBinding> {
    op.aggs
        .iter()
        .enumerate()
        .map(|(i, a)| ColumnBinding {
            tag: op.index2,
            column: i,
            typ: a.data_typ,
            name: a.alias.clone().unwrap_or_else(|| a.to_string()),
        })
        .collect()
}

fn init_aggr(op: &PhysicalAggGroup) -> Result<AggrOpState> {
    let child_layout = op.child.layout();
    let (specs, params) = aggr_specs(&op.aggs)?;
    let states_layout = aggr_states_layout(op);

    let mut child_bindings = ColumnBindings::new();
    child_bindings.bind(0, child_layout);
    let mut full_bindings = ColumnBindings::new();
    full_bindings.bind(0, child_layout);
    full_bindings.bind(2, &states_layout);

    // Sink evaluates (group expressions, then aggregate parameters) per chunk;
    // with no groups only the parameters remain.
    let mut sink_exprs = op.group_bys.clone();
    sink_exprs.extend(params);
    let sink_exec = ExprExec::new(sink_exprs, child_bindings.clone());
    let group_exec = ExprExec::new(op.group_bys.clone(), child_bindings);

    let (grouped, global) = if op.group_bys.is_empty() {
        (None, Some(GlobalAggrState::new(specs)))
    } else {
        (
            Some(GroupedHashTable::new(
                op.group_bys.iter().map(|g| g.data_typ).collect(),
                specs,
            )),
            None,
        )
    };
    let filter_exec = if op.filters.is_empty() {
        None
    } else {
        Some(ExprExec::new(op.filters.clone(), full_bindings.clone()))
    };
    Ok(AggrOpState {
        phase: AggrPhase::Init,
        grouped,
        global,
        sink_exec,
        group_exec,
        filter_exec,
        filter_sel: SelectVector::with_capacity(DEFAULT_VECTOR_SIZE),
        output_exec: ExprExec::new(op.outputs.clone(), full_bindings),
        scan_state: AggrScanState::default(),
        emitted_global: false,
    })
}

fn aggr_execute<'a>(
    state: &mut AggrOpState,
    op: &'a PhysicalAggGroup,
    config: &'a ExecConfig,
    children: &mut Vec<Runner<'a>>,
    output: &mut Chunk,
) -> Result<OperatorResult> {
    if state.phase == AggrPhase::Init {
        loop {
            let mut child_chunk = Chunk::empty();
            if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
                break;
            }
            let sink_chunk = state
                .sink_exec
                .execute_exprs([Some(&child_chunk), None, None])?;
            match (&mut state.grouped, &mut state.global) {
                (Some(grouped), _) => grouped.sink(&sink_chunk)?,
                (None, Some(global)) => global.sink(&sink_chunk)?,
                (None, None) => return Err(Error::internal("aggregation without state")),
            }
        }
        if state.grouped.is_some() {
            // The scan phase re-executes the child stream.
            children[0].close();
            children[0] = Runner::new(&op.child, config)?;
        }
        state.phase = AggrPhase::Scan;
    }

    if let Some(global) = &state.global {
        if state.emitted_global {
            return Ok(OperatorResult::Done);
        }
        let states = global.finalize_chunk()?;
        *output = state
            .output_exec
            .execute_exprs([None, None, Some(&states)])?;
        state.emitted_global = true;
        return Ok(OperatorResult::HaveMoreOutput);
    }

    let grouped = state
        .grouped
        .as_ref()
        .ok_or_else(|| Error::internal("aggregation without state"))?;
    loop {
        let mut child_chunk = Chunk::empty();
        if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
            break;
        }
        state.scan_state.child_cnt += child_chunk.card();

        let group_chunk = state
            .group_exec
            .execute_exprs([Some(&child_chunk), None, None])?;
        let (states_chunk, groups) = grouped.fetch_aggregates(&group_chunk)?;

        // Each group emits on first sight only.
        let mut first_sel = SelectVector::with_capacity(groups.len());
        for (row, group) in groups.iter().enumerate() {
            if let Some(g) = group {
                if state.scan_state.seen.insert(*g) {
                    first_sel.push(row);
                }
            }
        }
        if first_sel.is_empty() {
            continue;
        }
        let child2 = slice_all(&child_chunk, &first_sel, first_sel.len())?;
        let states2 = slice_all(&states_chunk, &first_sel, first_sel.len())?;

        let (child3, states3) = match &state.filter_exec {
            Some(filter) => {
                let survivors = filter.execute_select(
                    [Some(&child2), None, Some(&states2)],
                    &mut state.filter_sel,
                )?;
                state.scan_state.filtered_cnt += child2.card() - survivors;
                if survivors == 0 {
                    continue;
                }
                (
                    slice_all(&child2, &state.filter_sel, survivors)?,
                    slice_all(&states2, &state.filter_sel, survivors)?,
                )
            }
            None => (child2, states2),
        };
        *output = state
            .output_exec
            .execute_exprs([Some(&child3), None, Some(&states3)])?;
        if output.card() > 0 {
            state.scan_state.output_cnt += output.card();
            return Ok(OperatorResult::HaveMoreOutput);
        }
    }
    tracing::debug!(
        target: "quiver::aggr",
        child_cnt = state.scan_state.child_cnt,
        filtered_cnt = state.scan_state.filtered_cnt,
        output_cnt = state.scan_state.output_cnt,
        groups = grouped.num_groups(),
        "aggregation scan finished"
    );
    Ok(OperatorResult::Done)
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

fn init_order(op: &PhysicalOrder) -> Result<OrderOpState> {
    let child_layout = op.child.layout();
    let mut key_exprs = Vec::with_capacity(op.order_bys.len());
    let mut sort_columns = Vec::with_capacity(op.order_bys.len());
    for ob in &op.order_bys {
        let (desc, key) = match &ob.kind {
            ExprKind::OrderBy { desc, child } => (*desc, child.as_ref().clone()),
            _ => (false, ob.clone()),
        };
        sort_columns.push(SortColumn {
            typ: key.data_typ,
            desc,
            // Descending keys place NULLs first, the usual complement of the
            // ascending default.
            nulls_first: desc,
        });
        key_exprs.push(key);
    }
    let mut bindings = ColumnBindings::new();
    bindings.bind(0, child_layout);
    let payload_types = op.layout.iter().map(|b| b.typ).collect();
    Ok(OrderOpState {
        sort: LocalSort::new(SortLayout::new(sort_columns), RowLayout::new(payload_types)),
        key_exec: ExprExec::new(key_exprs, bindings.clone()),
        output_exec: ExprExec::new(op.outputs.clone(), bindings),
        scanner: None,
    })
}

fn order_execute(
    state: &mut OrderOpState,
    children: &mut [Runner<'_>],
    output: &mut Chunk,
) -> Result<OperatorResult> {
    if state.sort.state == SortState::Init {
        loop {
            let mut child_chunk = Chunk::empty();
            if exec_child(&mut children[0], &mut child_chunk)? == OperatorResult::Done {
                break;
            }
            let keys = state
                .key_exec
                .execute_exprs([Some(&child_chunk), None, None])?;
            let payload = state
                .output_exec
                .execute_exprs([Some(&child_chunk), None, None])?;
            state.sort.sink_chunk(&keys, &payload)?;
        }
        state.sort.state = SortState::Sort;
    }
    if state.sort.state == SortState::Sort {
        state.sort.sort(true);
        state.sort.state = SortState::Scan;
        state.scanner = Some(state.sort.scanner());
    }
    let scanner = state
        .scanner
        .as_mut()
        .ok_or_else(|| Error::internal("sort scan without a scanner"))?;
    *output = scanner.scan(&state.sort, DEFAULT_VECTOR_SIZE)?;
    if output.card() == 0 {
        return Ok(OperatorResult::Done);
    }
    Ok(OperatorResult::HaveMoreOutput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use quiver_expr::FuncSub;
    use quiver_types::LType;
    use std::io::Write;

    fn nation_fixture() -> (tempfile::TempDir, ExecConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nation.tbl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in [
            "0|ALGERIA|0|haggle|",
            "1|ARGENTINA|1|al foxes|",
            "2|BRAZIL|1|y alongside|",
            "3|CANADA|1|eas hang|",
        ] {
            writeln!(file, "{line}").unwrap();
        }
        let config = ExecConfig::new(DataFormat::Csv, dir.path());
        (dir, config)
    }

    fn nation_scan(tag: u64, filters: Vec<Expr>) -> PhysicalOperator {
        let name_binding = ColumnBinding {
            tag,
            column: 1,
            typ: LType::varchar(25),
            name: "n_name".into(),
        };
        let region_binding = ColumnBinding {
            tag,
            column: 2,
            typ: LType::integer(),
            name: "n_regionkey".into(),
        };
        PhysicalOperator::Scan(PhysicalScan {
            index: tag,
            database: "tpch".into(),
            table: "nation".into(),
            columns: vec!["n_name".into(), "n_regionkey".into()],
            column_ids: vec![1, 2],
            read_layout: vec![name_binding.clone(), region_binding],
            filters,
            outputs: vec![Expr::column(
                "nation",
                "n_name",
                (tag, 1),
                0,
                LType::varchar(25),
            )],
            layout: vec![name_binding],
        })
    }

    #[test]
    fn scan_filters_and_projects() {
        let (_dir, config) = nation_fixture();
        let filter = Expr::func(
            FuncSub::Equal,
            vec![
                Expr::column("nation", "n_regionkey", (1, 2), 0, LType::integer()),
                Expr::new(ExprKind::IntConst(1), LType::integer()),
            ],
            LType::boolean(),
        );
        let plan = nation_scan(1, vec![filter]);
        let mut runner = Runner::new(&plan, &config).unwrap();
        let chunks = runner.run_to_completion().unwrap();
        let names: Vec<String> = chunks
            .iter()
            .flat_map(|c| (0..c.card()).map(|r| c.value(0, r).to_string()))
            .collect();
        assert_eq!(names, vec!["ARGENTINA", "BRAZIL", "CANADA"]);
    }

    #[test]
    fn limit_truncates_the_stream() {
        let (_dir, config) = nation_fixture();
        let scan = nation_scan(1, Vec::new());
        let layout = scan.layout().to_vec();
        let plan = PhysicalOperator::Limit(quiver_plan::physical::PhysicalLimit {
            limit: Expr::new(ExprKind::IntConst(2), LType::integer()),
            outputs: Vec::new(),
            layout,
            child: Box::new(scan),
        });
        let mut runner = Runner::new(&plan, &config).unwrap();
        let chunks = runner.run_to_completion().unwrap();
        let total: usize = chunks.iter().map(|c| c.card()).sum();
        assert_eq!(total, 2);
    }
}
