// Daily energy usage telemetry per region, as produced by the device fleet
// (or by `generate_energy_usage` for synthetic data).

use flate2::read::GzDecoder;
use jiff::civil::Date;
use log::{error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub region: String,
    pub date: Date,
    pub usage_kwh: f64,
    pub device_count: i64,
    pub uptime_pct: f64,
    pub error_rate_pct: f64,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("row {row}: empty region")]
    MissingRegion { row: usize },
    #[error("row {row}: cannot parse '{value}' as a date")]
    InvalidDate { row: usize, value: String },
    #[error("row {row}: cannot parse '{value}' in column '{column}'")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("column '{0}' has no observed values to impute from")]
    NoObservations(&'static str),
}

/// The four numeric columns of the usage file.  Each one is imputed
/// independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Usage,
    Devices,
    Uptime,
    ErrorRate,
}

impl Column {
    const ALL: [Column; 4] = [
        Column::Usage,
        Column::Devices,
        Column::Uptime,
        Column::ErrorRate,
    ];

    fn name(&self) -> &'static str {
        match self {
            Column::Usage => "usage_kwh",
            Column::Devices => "device_count",
            Column::Uptime => "uptime_pct",
            Column::ErrorRate => "error_rate_pct",
        }
    }

    /// Header names accepted for the column, compared case-insensitively.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Column::Usage => &["usage_kwh", "kwh"],
            Column::Devices => &["device_count", "devices"],
            Column::Uptime => &["uptime_pct", "uptime"],
            Column::ErrorRate => &["error_rate_pct", "error_rate"],
        }
    }
}

/// Cell values treated as missing, besides the empty string.
const MISSING_MARKERS: [&str; 4] = ["na", "n/a", "nan", "null"];

struct RawRow {
    region: String,
    date: Date,
    values: [Option<f64>; 4],
}

pub struct EnergyUsageArchive {
    pub base_dir: String,
    /// Region assigned to every row when the file has no `region` column.
    pub default_region: Option<String>,
}

impl EnergyUsageArchive {
    /// Path of the usage CSV file.  Does not check if the file exists.
    pub fn filename(&self) -> String {
        self.base_dir.to_owned() + "/energy_usage.csv"
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<UsageRecord>, LoadError> {
        load_file(path, self.default_region.as_deref())
    }

    pub fn read_file_or_empty(&self, path: &Path) -> Vec<UsageRecord> {
        load_or_empty(path, self.default_region.as_deref())
    }
}

/// Load the usage file, logging and swallowing any error.  An empty result
/// means "no data available".
pub fn load_or_empty(path: &Path, default_region: Option<&str>) -> Vec<UsageRecord> {
    match load_file(path, default_region) {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to load energy usage from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Load a csv or csv.gz file with usage data.
pub fn load_file(path: &Path, default_region: Option<&str>) -> Result<Vec<UsageRecord>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => load(GzDecoder::new(file), default_region)?,
        _ => load(file, default_region)?,
    };
    info!("Loaded {} usage records from {}", records.len(), path.display());
    Ok(records)
}

/// Read usage records from any csv source with a header row.
///
/// Dates are normalized to calendar dates, missing numeric values are replaced
/// with the mean of the observed values in the same column.  The means are
/// computed over the whole set first, then every row is repaired.
pub fn load<R: Read>(source: R, default_region: Option<&str>) -> Result<Vec<UsageRecord>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers = rdr.headers()?.clone();
    let find = |aliases: &[&str]| {
        headers
            .iter()
            .position(|h| aliases.iter().any(|a| a.eq_ignore_ascii_case(h)))
    };

    let region_idx = find(&["region"]);
    if region_idx.is_none() && default_region.is_none() {
        return Err(LoadError::MissingColumn("region"));
    }
    let date_idx = find(&["date"]).ok_or(LoadError::MissingColumn("date"))?;
    let mut value_idx = [0usize; 4];
    for (k, column) in Column::ALL.iter().enumerate() {
        value_idx[k] = find(column.aliases()).ok_or(LoadError::MissingColumn(column.name()))?;
    }

    let mut rows: Vec<RawRow> = Vec::new();
    let mut seen: HashSet<(String, Date)> = HashSet::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 1;
        let region = match (region_idx, default_region) {
            (Some(idx), _) => record.get(idx).unwrap_or_default().to_string(),
            (None, Some(region)) => region.to_string(),
            (None, None) => unreachable!(),
        };
        if region.is_empty() {
            return Err(LoadError::MissingRegion { row });
        }
        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = normalize_date(raw_date).ok_or_else(|| LoadError::InvalidDate {
            row,
            value: raw_date.to_string(),
        })?;

        let mut values = [None; 4];
        for (k, column) in Column::ALL.iter().enumerate() {
            let cell = record.get(value_idx[k]).unwrap_or_default();
            values[k] = parse_cell(cell, *column).ok_or_else(|| LoadError::InvalidNumber {
                row,
                column: column.name(),
                value: cell.to_string(),
            })?;
        }

        if !seen.insert((region.clone(), date)) {
            warn!("Duplicate usage row for {} on {}, keeping the first one", region, date);
            continue;
        }
        rows.push(RawRow {
            region,
            date,
            values,
        });
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let means = column_means(&rows)?;
    let records = rows
        .into_iter()
        .map(|r| UsageRecord {
            region: r.region,
            date: r.date,
            usage_kwh: r.values[0].unwrap_or(means[0]),
            device_count: r.values[1].unwrap_or(means[1].round()) as i64,
            uptime_pct: r.values[2].unwrap_or(means[2]),
            error_rate_pct: r.values[3].unwrap_or(means[3]),
        })
        .collect();
    Ok(records)
}

/// Parse a numeric cell.  Returns `Some(None)` for a missing value and `None`
/// if the cell holds something that isn't a valid number for the column.
fn parse_cell(cell: &str, column: Column) -> Option<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || MISSING_MARKERS.iter().any(|m| m.eq_ignore_ascii_case(cell)) {
        return Some(None);
    }
    let value = cell.parse::<f64>().ok().filter(|v| v.is_finite())?;
    if column == Column::Devices && value.fract() != 0.0 {
        return None;
    }
    Some(Some(value))
}

fn column_means(rows: &[RawRow]) -> Result<[f64; 4], LoadError> {
    let mut means = [0.0; 4];
    for (k, column) in Column::ALL.iter().enumerate() {
        let observed: Vec<f64> = rows.iter().filter_map(|r| r.values[k]).collect();
        if observed.is_empty() {
            return Err(LoadError::NoObservations(column.name()));
        }
        means[k] = observed.iter().sum::<f64>() / observed.len() as f64;
    }
    Ok(means)
}

/// Date layouts accepted in the usage file and in the API timestamps, tried
/// in order.  Month first wins over day first for `a/b/YYYY`.
const DATE_FORMATS: [&str; 12] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%Y%m%d",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a date in any of the [`DATE_FORMATS`], with or without zero
/// padding.  The time of day, if any, is dropped.
pub fn normalize_date(value: &str) -> Option<Date> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| Date::strptime(format, value).ok())
}

/// Serde helper to read a date column with [`normalize_date`].
pub fn deserialize_date<'de, D>(deserializer: D) -> Result<Date, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    normalize_date(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", s)))
}
