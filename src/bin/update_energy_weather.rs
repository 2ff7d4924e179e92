use std::{error::Error, path::PathBuf, process};

use clap::Parser;
use energy_weather::{
    analysis::{correlation::CorrelationResult, merge_and_analyze},
    db::{
        energy::energy_weather_archive::Destinations,
        open_meteo::weather_archive::{Frequency, WeatherQuery},
        prod_db::{load_env, ProdDb},
    },
};
use itertools::Itertools;
use jiff::civil::Date;
use log::{error, info, warn};
use tabled::{builder::Builder, settings::Style};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Usage csv file.  Defaults to the file in the energy usage archive.
    #[arg(long)]
    usage_file: Option<PathBuf>,

    /// First day of weather data
    #[arg(long, default_value = "2025-03-18")]
    start: Date,

    /// Last day of weather data, inclusive
    #[arg(long, default_value = "2025-05-27")]
    end: Date,

    /// Weather series to aggregate, hourly or daily
    #[arg(long, default_value = "hourly")]
    frequency: Frequency,

    #[arg(long, default_value = "Australia/Sydney")]
    timezone: String,

    /// Don't write the merged csv file
    #[arg(long)]
    no_csv: bool,

    /// Don't replace the DuckDB table
    #[arg(long)]
    no_duckdb: bool,
}

/// Make an ASCII table from the correlation results
fn ascii_table(data: &[CorrelationResult]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Region", "Metric", "Correlation"]);
    for result in data {
        builder.push_record(vec![
            result.region.clone(),
            result.metric.to_string(),
            result.outcome.to_string(),
        ]);
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

    let regions = ProdDb::regions()?;
    info!(
        "Fetching weather for {}",
        regions.iter().map(|r| r.name.as_str()).join(", ")
    );
    let query = WeatherQuery {
        start: args.start,
        end: args.end,
        frequency: args.frequency,
        timezone: args.timezone.clone(),
    };
    let open_meteo = ProdDb::open_meteo();
    let client = open_meteo.client()?;
    let weather = open_meteo.fetch_regions(&client, &regions, &query);
    if !weather.failures.is_empty() {
        warn!(
            "No weather for regions: {}",
            weather.failures.iter().map(|(name, _)| name).join(", ")
        );
    }

    let usage_archive = ProdDb::energy_usage();
    let usage_file = args
        .usage_file
        .unwrap_or_else(|| PathBuf::from(usage_archive.filename()));
    let usage = usage_archive.read_file_or_empty(&usage_file);

    if usage.is_empty() || weather.records.is_empty() {
        error!("Nothing to merge, exiting");
        process::exit(1);
    }

    let (merged, correlations) = merge_and_analyze(&usage, &weather.records);
    println!("{}", ascii_table(&correlations));

    let archive = ProdDb::energy_weather();
    let destinations = Destinations {
        csv: !args.no_csv,
        duckdb: !args.no_duckdb,
    };
    match archive.write(&merged, destinations) {
        Ok(()) => info!("Done, {} merged rows", merged.len()),
        Err(e) => {
            error!("Failed to save the merged data: {}", e);
            process::exit(1);
        }
    }

    Ok(())
}
