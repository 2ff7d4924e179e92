use duckdb::types::{TimeUnit, Value};
use duckdb::{AccessMode, Connection};
use jiff::{civil::date, Timestamp, ToSpan};
use log::{error, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::named_queries::NamedQuery;
use crate::utils::lib_duckdb::open_with_retry;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("query is empty")]
    EmptyQuery,
    #[error("a query with the same name was already exported")]
    DuplicateName,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub name: String,
    pub path: PathBuf,
    /// Number of rows exported.
    pub result: Result<usize, ExecutionError>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub outcomes: Vec<QueryOutcome>,
}

impl ExportReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|x| x.result.is_err())
    }

    pub fn failures(&self) -> impl Iterator<Item = &QueryOutcome> {
        self.outcomes.iter().filter(|x| x.result.is_err())
    }

    pub fn successes(&self) -> impl Iterator<Item = &QueryOutcome> {
        self.outcomes.iter().filter(|x| x.result.is_ok())
    }
}

/// The rows returned by a query, with every value rendered as text.
#[derive(Debug, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct QueryExporter {
    pub out_dir: PathBuf,
    /// File extension of the exported files, e.g. `csv`.
    pub extension: String,
}

impl QueryExporter {
    pub fn filename(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{}.{}", name, self.extension))
    }

    /// Run each query and save its result to a file named after the query.
    /// A failing query is recorded in the report, the remaining queries still
    /// run.
    pub fn export(&self, queries: &[NamedQuery], conn: &Connection) -> ExportReport {
        let mut names: HashSet<&str> = HashSet::new();
        let mut report = ExportReport::default();
        for query in queries {
            info!("Running query: {}", query.name);
            let path = self.filename(&query.name);
            let result = if names.insert(query.name.as_str()) {
                export_one(conn, &query.query, &path)
            } else {
                Err(ExecutionError::DuplicateName)
            };
            match &result {
                Ok(n) => info!("Saved {} rows to {}", n, path.display()),
                Err(e) => error!("Query {} failed: {}", query.name, e),
            }
            report.outcomes.push(QueryOutcome {
                name: query.name.clone(),
                path,
                result,
            });
        }
        report
    }

    /// Open the database read-only, run the whole batch on that one
    /// connection and close it.
    pub fn export_from_store(
        &self,
        queries: &[NamedQuery],
        duckdb_path: &str,
    ) -> Result<ExportReport, ExecutionError> {
        let conn = open_with_retry(duckdb_path, 8, Duration::from_millis(25), AccessMode::ReadOnly)?;
        let report = self.export(queries, &conn);
        if let Err((_, e)) = conn.close() {
            warn!("Failed to close {}: {}", duckdb_path, e);
        }
        Ok(report)
    }
}

fn export_one(conn: &Connection, query: &str, path: &Path) -> Result<usize, ExecutionError> {
    let result = run_query(conn, query)?;
    write_result(&result, path)?;
    Ok(result.rows.len())
}

/// Execute a query and collect all the rows.
pub fn run_query(conn: &Connection, query: &str) -> Result<QueryResult, ExecutionError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ExecutionError::EmptyQuery);
    }
    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();
    let mut data: Vec<Vec<String>> = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(render(row.get::<usize, Value>(i)?));
        }
        data.push(values);
    }
    Ok(QueryResult {
        columns,
        rows: data,
    })
}

/// Write the header and the rows.  Overwrites an existing file.
pub fn write_result(result: &QueryResult, path: &Path) -> Result<(), ExecutionError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&result.columns)?;
    for row in &result.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Render a DuckDB value for a csv cell.  NULL is an empty cell, dates are
/// `YYYY-MM-DD`.
fn render(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Boolean(x) => x.to_string(),
        Value::TinyInt(x) => x.to_string(),
        Value::SmallInt(x) => x.to_string(),
        Value::Int(x) => x.to_string(),
        Value::BigInt(x) => x.to_string(),
        Value::HugeInt(x) => x.to_string(),
        Value::UTinyInt(x) => x.to_string(),
        Value::USmallInt(x) => x.to_string(),
        Value::UInt(x) => x.to_string(),
        Value::UBigInt(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Double(x) => x.to_string(),
        Value::Decimal(x) => x.to_string(),
        Value::Text(x) => x,
        Value::Enum(x) => x,
        Value::Date32(days) => match date(1970, 1, 1).checked_add(i64::from(days).days()) {
            Ok(d) => d.to_string(),
            Err(_) => days.to_string(),
        },
        Value::Timestamp(unit, t) => {
            let micros = match unit {
                TimeUnit::Second => t.saturating_mul(1_000_000),
                TimeUnit::Millisecond => t.saturating_mul(1_000),
                TimeUnit::Microsecond => t,
                TimeUnit::Nanosecond => t / 1_000,
            };
            match Timestamp::from_microsecond(micros) {
                Ok(ts) => ts.to_string(),
                Err(_) => t.to_string(),
            }
        }
        other => format!("{:?}", other),
    }
}
