use std::{error::Error, path::PathBuf, process};

use clap::Parser;
use energy_weather::{
    db::prod_db::{load_env, ProdDb},
    sql::{export::ExportReport, named_queries::parse_file},
};
use log::{error, info, warn};
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// File with the `-- name: <query_name>` blocks
    #[arg(long, default_value = "sql/energy_queries.sql")]
    sql_file: PathBuf,

    /// Output folder, defaults to the exports folder in the archive
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// DuckDB file to query, defaults to the production database
    #[arg(long)]
    db: Option<String>,

    #[arg(long, default_value = "csv")]
    extension: String,
}

fn ascii_table(report: &ExportReport) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Query", "Rows", "File"]);
    for outcome in &report.outcomes {
        let (rows, file) = match &outcome.result {
            Ok(n) => (n.to_string(), outcome.path.display().to_string()),
            Err(e) => ("FAILED".to_string(), e.to_string()),
        };
        builder.push_record(vec![outcome.name.clone(), rows, file]);
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    load_env(&args.env);

    let queries = parse_file(&args.sql_file)?;
    if queries.is_empty() {
        warn!("No named queries in {}", args.sql_file.display());
        return Ok(());
    }
    info!("Found {} queries in {}", queries.len(), args.sql_file.display());

    let mut exporter = ProdDb::query_exporter();
    if let Some(dir) = args.out_dir {
        exporter.out_dir = dir;
    }
    exporter.extension = args.extension;
    let duckdb_path = args.db.unwrap_or_else(ProdDb::duckdb_path);

    let report = exporter.export_from_store(&queries, &duckdb_path)?;
    println!("{}", ascii_table(&report));

    if report.has_failures() {
        error!(
            "{} of {} queries failed",
            report.failures().count(),
            report.outcomes.len()
        );
        process::exit(1);
    }
    Ok(())
}
