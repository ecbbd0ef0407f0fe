//! Predicate pushdown must not change query results: for a corpus of
//! generated AND/OR/comparison predicates over a two-table join, the rows
//! accepted by the raw plan equal those accepted by the optimized plan.

use std::io::Write;

use quiver_exec::{DataFormat, ExecConfig, Runner};
use quiver_plan::{create_physical_plan, optimize, Builder};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tempfile::TempDir;

fn fixture() -> (TempDir, ExecConfig) {
    let dir = tempfile::tempdir().unwrap();
    let mut nation = std::fs::File::create(dir.path().join("nation.tbl")).unwrap();
    for (key, name, region) in [
        (0, "ALGERIA", 0),
        (1, "ARGENTINA", 1),
        (2, "BRAZIL", 1),
        (3, "CANADA", 1),
        (4, "EGYPT", 4),
        (5, "ETHIOPIA", 0),
        (6, "FRANCE", 3),
        (7, "GERMANY", 3),
        (8, "INDIA", 2),
        (9, "INDONESIA", 2),
    ] {
        writeln!(nation, "{key}|{name}|{region}|x|").unwrap();
    }
    let mut region = std::fs::File::create(dir.path().join("region.tbl")).unwrap();
    for (key, name) in [
        (0, "AFRICA"),
        (1, "AMERICA"),
        (2, "ASIA"),
        (3, "EUROPE"),
        (4, "MIDDLE EAST"),
    ] {
        writeln!(region, "{key}|{name}|x|").unwrap();
    }
    (dir, ExecConfig::new(DataFormat::Csv, std::path::PathBuf::new()))
}

fn run(sql: &str, config: &ExecConfig, optimized: bool) -> Vec<Vec<String>> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
    let query = match statements.into_iter().next().unwrap() {
        Statement::Query(q) => *q,
        other => panic!("expected query, got {other:?}"),
    };
    let mut builder = Builder::new();
    builder.build_select(&query, None).unwrap();
    let mut root = builder.create_plan().unwrap();
    if optimized {
        root = optimize(root).unwrap();
    }
    let needed: Vec<(u64, usize)> = (0..builder.column_count)
        .map(|i| (builder.project_tag, i))
        .collect();
    let physical = create_physical_plan(&root, &needed).unwrap();
    let mut runner = Runner::new(&physical, config).unwrap();
    let chunks = runner.run_to_completion().unwrap();
    let mut rows: Vec<Vec<String>> = chunks
        .iter()
        .flat_map(|c| {
            (0..c.card()).map(|r| {
                (0..c.column_count())
                    .map(|col| c.value(col, r).to_string())
                    .collect()
            })
        })
        .collect();
    rows.sort();
    rows
}

/// Deterministic generator (multiplicative congruential) for the predicate
/// corpus.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

fn gen_comparison(rng: &mut Lcg) -> String {
    let columns = ["n_regionkey", "n_nationkey", "r_regionkey"];
    let ops = ["=", "<", "<=", ">", ">=", "<>"];
    let left = columns[rng.next(columns.len() as u64) as usize];
    let op = ops[rng.next(ops.len() as u64) as usize];
    if rng.next(3) == 0 {
        let right = columns[rng.next(columns.len() as u64) as usize];
        format!("{left} {op} {right}")
    } else {
        format!("{left} {op} {}", rng.next(5))
    }
}

fn gen_predicate(rng: &mut Lcg) -> String {
    let a = gen_comparison(rng);
    let b = gen_comparison(rng);
    let c = gen_comparison(rng);
    match rng.next(3) {
        0 => format!("{a} AND {b}"),
        1 => format!("{a} AND ({b} OR {c})"),
        _ => format!("({a} OR {b}) AND {c}"),
    }
}

#[test]
fn optimized_plans_accept_the_same_rows() {
    let (dir, mut config) = fixture();
    config.data_path = dir.path().to_path_buf();
    let mut rng = Lcg(0x5eed);
    for _ in 0..24 {
        let predicate = gen_predicate(&mut rng);
        let sql = format!(
            "SELECT n_nationkey, r_regionkey FROM nation, region WHERE {predicate}"
        );
        let raw = run(&sql, &config, false);
        let optimized = run(&sql, &config, true);
        assert_eq!(raw, optimized, "pushdown changed the result of: {sql}");
    }
}
