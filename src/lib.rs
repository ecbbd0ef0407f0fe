//! Quiver: a single-process, read-only vectorized SQL engine over the TPC-H
//! catalog.
//!
//! The [`Engine`] wires the whole pipeline together: parse the SQL text,
//! bind it clause-by-clause, build and decorrelate the logical plan, run the
//! rule-based optimizer, lower to a physical plan with pruned columns, and
//! pull result chunks from the operator tree.

use quiver_exec::Runner;
use quiver_plan::{create_physical_plan, optimize, Builder, LogicalOperator, PhysicalOperator};
use quiver_result::{Error, Result};
use quiver_types::Chunk;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub use quiver_exec::{DataFormat, ExecConfig};
pub use quiver_result::Error as QuiverError;

/// A finished query: output column names plus the result chunks.
#[derive(Debug)]
pub struct QueryResult {
    pub names: Vec<String>,
    pub chunks: Vec<Chunk>,
}

impl QueryResult {
    /// Total row count across chunks.
    pub fn row_count(&self) -> usize {
        self.chunks.iter().map(|c| c.card()).sum()
    }

    /// All rows rendered as strings, for tests and the CLI printer.
    pub fn rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.row_count());
        for chunk in &self.chunks {
            for row in 0..chunk.card() {
                rows.push(
                    (0..chunk.column_count())
                        .map(|col| chunk.value(col, row).to_string())
                        .collect(),
                );
            }
        }
        rows
    }
}

/// The query engine over one immutable configuration.
pub struct Engine {
    config: ExecConfig,
}

impl Engine {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    /// Run one SELECT statement and collect its result chunks.
    pub fn run_sql(&self, sql: &str) -> Result<QueryResult> {
        let (builder, physical) = self.plan_sql(sql)?;
        tracing::debug!(target: "quiver::engine", plan = %physical, "executing");
        let mut runner = Runner::new(&physical, &self.config)?;
        let chunks = runner.run_to_completion()?;
        Ok(QueryResult {
            names: builder.names,
            chunks,
        })
    }

    /// Render the optimized logical plan and the physical plan.
    pub fn explain(&self, sql: &str) -> Result<String> {
        let (_builder, logical, physical) = self.plan_stages(sql)?;
        Ok(format!(
            "=== Logical Plan ===\n{logical}=== Physical Plan ===\n{physical}"
        ))
    }

    fn plan_sql(&self, sql: &str) -> Result<(Builder, PhysicalOperator)> {
        let (builder, _logical, physical) = self.plan_stages(sql)?;
        Ok((builder, physical))
    }

    fn plan_stages(&self, sql: &str) -> Result<(Builder, LogicalOperator, PhysicalOperator)> {
        let query = parse_query(sql)?;
        let mut builder = Builder::new();
        builder.build_select(&query, None)?;
        let root = builder.create_plan()?;
        let root = optimize(root)?;
        let needed: Vec<(u64, usize)> = (0..builder.column_count)
            .map(|i| (builder.project_tag, i))
            .collect();
        let physical = create_physical_plan(&root, &needed)?;
        Ok((builder, root, physical))
    }
}

fn parse_query(sql: &str) -> Result<sqlparser::ast::Query> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|err| Error::Parse(format!("failed to parse SQL: {err}")))?;
    let mut statements = statements.into_iter();
    let statement = statements
        .next()
        .ok_or_else(|| Error::Parse("empty statement".into()))?;
    if statements.next().is_some() {
        return Err(Error::unsupported("multiple statements"));
    }
    match statement {
        Statement::Query(query) => Ok(*query),
        other => Err(Error::unsupported(format!("statement {other}"))),
    }
}

/// Render result chunks as an aligned text table.
pub fn format_result(result: &QueryResult) -> String {
    let rows = result.rows();
    let mut widths: Vec<usize> = result.names.iter().map(|n| n.len()).collect();
    for row in &rows {
        for (col, cell) in row.iter().enumerate() {
            if col < widths.len() {
                widths[col] = widths[col].max(cell.len());
            } else {
                widths.push(cell.len());
            }
        }
    }
    let mut out = String::new();
    let render = |cells: &[String], widths: &[usize], out: &mut String| {
        for (col, cell) in cells.iter().enumerate() {
            if col > 0 {
                out.push_str(" | ");
            }
            out.push_str(cell);
            out.push_str(&" ".repeat(widths.get(col).copied().unwrap_or(0) - cell.len()));
        }
        out.push('\n');
    };
    render(&result.names, &widths, &mut out);
    let total: usize = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);
    out.push_str(&"-".repeat(total));
    out.push('\n');
    for row in &rows {
        render(row, &widths, &mut out);
    }
    out.push_str(&format!("({} rows)\n", rows.len()));
    out
}
