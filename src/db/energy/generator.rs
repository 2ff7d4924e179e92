use jiff::{civil::Date, ToSpan};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::error::Error;
use std::path::Path;

/// Settings for a synthetic usage data set.
#[derive(Debug, Clone)]
pub struct SyntheticUsage {
    pub regions: Vec<String>,
    pub start: Date,
    /// Number of consecutive days to generate for each region.
    pub days: usize,
    pub seed: u64,
    /// Fraction of numeric cells left blank, in [0, 1).
    pub missing_fraction: f64,
}

/// One csv row.  Numeric fields are optional so that blank cells can be
/// written out.
#[derive(Debug, serde::Serialize)]
pub struct SyntheticRow {
    pub region: String,
    pub date: Date,
    #[serde(rename = "usage_kWh")]
    pub usage_kwh: Option<f64>,
    pub device_count: Option<i64>,
    pub uptime_pct: Option<f64>,
    pub error_rate_pct: Option<f64>,
}

impl SyntheticUsage {
    /// Generate the rows.  The same seed always produces the same data.
    pub fn generate(&self) -> Vec<SyntheticRow> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows = Vec::with_capacity(self.regions.len() * self.days);
        for region in &self.regions {
            let base_kwh = rng.random_range(800..=1300) as f64;
            let base_devices: i64 = rng.random_range(30..=50);
            for day in self.start.series(1.day()).take(self.days) {
                let kwh = (base_kwh + 50.0 * standard_normal(&mut rng)).round();
                let devices = base_devices + rng.random_range(-3..=3);
                let uptime = round2(rng.random_range(95.0..100.0));
                let error_rate = round2(rng.random_range(0.0..5.0));
                let mut blank = |x| {
                    if rng.random::<f64>() < self.missing_fraction {
                        None
                    } else {
                        Some(x)
                    }
                };
                rows.push(SyntheticRow {
                    region: region.clone(),
                    date: day,
                    usage_kwh: blank(kwh),
                    device_count: blank(devices as f64).map(|x| x as i64),
                    uptime_pct: blank(uptime),
                    error_rate_pct: blank(error_rate),
                });
            }
        }
        rows
    }

    pub fn write_csv(&self, path: &Path) -> Result<usize, Box<dyn Error>> {
        let rows = self.generate();
        let mut wtr = csv::Writer::from_path(path)?;
        for row in &rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(rows.len())
    }
}

/// Box-Muller transform
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
