use duckdb::{AccessMode, Connection};
use log::{info, warn};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::merge::MergedRecord;
use crate::utils::lib_duckdb::{open_with_retry, sql_literal};

/// The merged usage and weather data, kept as a csv file and as a DuckDB
/// table that is replaced on every update.
pub struct EnergyWeatherArchive {
    pub base_dir: String,
    pub duckdb_path: String,
    pub table: String,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("invalid table name '{0}'")]
    InvalidTable(String),
}

/// Where to persist the merged records, any combination is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destinations {
    pub csv: bool,
    pub duckdb: bool,
}

impl EnergyWeatherArchive {
    /// Path of the merged csv file.  Does not check if the file exists.
    pub fn filename(&self) -> String {
        self.base_dir.to_owned() + "/energy_weather.csv"
    }

    /// Persist the records to the requested destinations.
    pub fn write(&self, records: &[MergedRecord], destinations: Destinations) -> Result<(), SinkError> {
        if destinations.csv {
            let path = self.filename();
            write_csv(records, Path::new(&path))?;
            info!("Saved {} merged rows to {}", records.len(), path);
        }
        if destinations.duckdb {
            let n = self.update_duckdb(records)?;
            info!("Table {} in {} now has {} rows", self.table, self.duckdb_path, n);
        }
        Ok(())
    }

    pub fn read_csv(&self, path: &Path) -> Result<Vec<MergedRecord>, SinkError> {
        let mut rdr = csv::Reader::from_path(path)?;
        let records = rdr.deserialize().collect::<Result<Vec<MergedRecord>, _>>()?;
        Ok(records)
    }

    /// Replace the table with the records.  The records are staged as a csv
    /// file in the `tmp/` folder and loaded with `read_csv`.
    pub fn update_duckdb(&self, records: &[MergedRecord]) -> Result<usize, SinkError> {
        validate_table_name(&self.table)?;
        let staging = format!("{}/tmp/{}.csv", self.base_dir, self.table);
        write_csv(records, Path::new(&staging))?;

        let mut conn = open_with_retry(
            &self.duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )?;
        let n = replace_table(&mut conn, &self.table, Path::new(&staging))?;
        if let Err((_, e)) = conn.close() {
            warn!("Failed to close {}: {}", self.duckdb_path, e);
        }
        if let Err(e) = fs::remove_file(&staging) {
            warn!("Failed to remove {}: {}", staging, e);
        }
        Ok(n)
    }
}

/// Overwrite the csv file, header included.
pub fn write_csv(records: &[MergedRecord], path: &Path) -> Result<(), SinkError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    if records.is_empty() {
        wtr.write_record(COLUMNS.iter().map(|(name, _)| name))?;
    }
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Column names and DuckDB types, in the order of the [`MergedRecord`] fields.
const COLUMNS: [(&str, &str); 8] = [
    ("region", "VARCHAR"),
    ("date", "DATE"),
    ("usage_kwh", "DOUBLE"),
    ("device_count", "BIGINT"),
    ("uptime_pct", "DOUBLE"),
    ("error_rate_pct", "DOUBLE"),
    ("temperature_c", "DOUBLE"),
    ("solar_radiation_wm2", "DOUBLE"),
];

/// Replace the content of `table` with the rows of a merged csv file, in a
/// single transaction.  If anything fails the previous table is left as it
/// was.  Returns the number of rows in the new table.
pub fn replace_table(conn: &mut Connection, table: &str, csv_path: &Path) -> Result<usize, SinkError> {
    validate_table_name(table)?;
    let columns = COLUMNS
        .iter()
        .map(|(name, kind)| format!("'{}': '{}'", name, kind))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r"
CREATE OR REPLACE TABLE {table} AS
    SELECT *
    FROM read_csv({path},
        header = true,
        dateformat = '%Y-%m-%d',
        columns = {{{columns}}});",
        table = table,
        path = sql_literal(&csv_path.to_string_lossy()),
        columns = columns,
    );

    let tx = conn.transaction()?;
    tx.execute_batch(&sql)?;
    let n: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    tx.commit()?;
    Ok(n as usize)
}

fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let re = Regex::new(r"^[A-Za-z_]\w*$").map_err(|_| SinkError::InvalidTable(table.to_string()))?;
    if re.is_match(table) {
        Ok(())
    } else {
        Err(SinkError::InvalidTable(table.to_string()))
    }
}
