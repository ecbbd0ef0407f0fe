use std::path::PathBuf;
use std::process;

use clap::Parser;
use quiver::{DataFormat, Engine, ExecConfig};

#[derive(Parser)]
#[command(
    name = "quiver",
    about = "Read-only vectorized SQL engine over TPC-H tables"
)]
struct Cli {
    /// TOML configuration file with `format`, `data_path`, `show_raw`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the table files (overrides the config file).
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Data format: csv or parquet.
    #[arg(long, default_value = "csv")]
    format: String,

    /// Trace raw records as the scan reads them.
    #[arg(long)]
    show_raw: bool,

    /// Print the logical and physical plans instead of executing.
    #[arg(long)]
    explain: bool,

    /// Query text to run.
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// File holding the query text.
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => toml::from_str::<ExecConfig>(&std::fs::read_to_string(path)?)?,
        None => {
            let data_path = cli
                .data_path
                .clone()
                .ok_or("either --config or --data-path is required")?;
            let format = match cli.format.as_str() {
                "csv" => DataFormat::Csv,
                "parquet" => DataFormat::Parquet,
                other => return Err(format!("unknown format {other}").into()),
            };
            ExecConfig::new(format, data_path)
        }
    };
    if let Some(data_path) = cli.data_path {
        config.data_path = data_path;
    }
    config.show_raw |= cli.show_raw;

    let sql = match (&cli.query, &cli.file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Err("either --query or --file is required".into()),
    };

    let engine = Engine::new(config);
    if cli.explain {
        print!("{}", engine.explain(&sql)?);
        return Ok(());
    }
    let result = engine.run_sql(&sql)?;
    print!("{}", quiver::format_result(&result));
    Ok(())
}
