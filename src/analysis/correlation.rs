use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

use super::merge::MergedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeatherMetric {
    Temperature,
    SolarRadiation,
}

impl WeatherMetric {
    pub const ALL: [WeatherMetric; 2] = [WeatherMetric::Temperature, WeatherMetric::SolarRadiation];

    pub fn value(&self, record: &MergedRecord) -> Option<f64> {
        match self {
            WeatherMetric::Temperature => Some(record.temperature_c),
            WeatherMetric::SolarRadiation => record.solar_radiation_wm2,
        }
    }
}

impl Display for WeatherMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeatherMetric::Temperature => write!(f, "temperature_c"),
            WeatherMetric::SolarRadiation => write!(f, "solar_radiation_wm2"),
        }
    }
}

/// Outcome of correlating two series.  Skipped cases are valid outcomes, not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Correlation {
    Coefficient(f64),
    InsufficientData { rows: usize },
    InsufficientVariance,
}

impl Correlation {
    pub fn coefficient(&self) -> Option<f64> {
        match self {
            Correlation::Coefficient(r) => Some(*r),
            _ => None,
        }
    }
}

impl Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correlation::Coefficient(r) => write!(f, "{:.3}", r),
            Correlation::InsufficientData { rows } => {
                write!(f, "too few data points ({})", rows)
            }
            Correlation::InsufficientVariance => write!(f, "insufficient variance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub region: String,
    pub metric: WeatherMetric,
    pub outcome: Correlation,
}

/// Pearson correlation between two series of the same length.
///
/// Returns [`Correlation::InsufficientData`] for fewer than 2 points and
/// [`Correlation::InsufficientVariance`] if either series is constant.
/// Series of different lengths can't be paired and give no data.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Correlation {
    if xs.len() != ys.len() {
        return Correlation::InsufficientData { rows: 0 };
    }
    let n = xs.len();
    if n < 2 {
        return Correlation::InsufficientData { rows: n };
    }
    if xs.iter().all(|x| *x == xs[0]) || ys.iter().all(|y| *y == ys[0]) {
        return Correlation::InsufficientVariance;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return Correlation::InsufficientVariance;
    }
    Correlation::Coefficient((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

/// Correlate usage with each weather metric, one region at a time.  Regions
/// come out sorted by name.  Solar radiation is only evaluated for regions
/// where at least one merged row carries it.
pub fn correlate_by_region(merged: &[MergedRecord]) -> Vec<CorrelationResult> {
    let mut groups: BTreeMap<&str, Vec<&MergedRecord>> = BTreeMap::new();
    for r in merged {
        groups.entry(r.region.as_str()).or_default().push(r);
    }
    let mut results = Vec::new();
    for (region, rows) in groups {
        for metric in WeatherMetric::ALL {
            let (usage, weather): (Vec<f64>, Vec<f64>) = rows
                .iter()
                .filter_map(|r| metric.value(r).map(|w| (r.usage_kwh, w)))
                .unzip();
            if metric == WeatherMetric::SolarRadiation && weather.is_empty() {
                continue;
            }
            results.push(CorrelationResult {
                region: region.to_string(),
                metric,
                outcome: pearson(&usage, &weather),
            });
        }
    }
    results
}
