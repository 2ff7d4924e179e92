use std::{error::Error, fs, path::PathBuf};

use clap::Parser;
use energy_weather::db::{
    energy::generator::SyntheticUsage,
    prod_db::{load_env, ProdDb},
};
use jiff::civil::Date;
use log::info;

/// Write a synthetic energy usage file, one row per region and day.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Output file, defaults to the file in the energy usage archive
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value = "2025-01-01")]
    start: Date,

    #[arg(long, default_value_t = 181)]
    days: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Fraction of numeric cells to leave blank
    #[arg(long, default_value_t = 0.0)]
    missing_fraction: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    load_env(&args.env);

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(ProdDb::energy_usage().filename()));
    if let Some(dir) = out.parent() {
        fs::create_dir_all(dir)?;
    }

    let regions = ProdDb::regions()?.into_iter().map(|r| r.name).collect();
    let generator = SyntheticUsage {
        regions,
        start: args.start,
        days: args.days,
        seed: args.seed,
        missing_fraction: args.missing_fraction,
    };
    let n = generator.write_csv(&out)?;
    info!("Wrote {} rows to {}", n, out.display());
    Ok(())
}
