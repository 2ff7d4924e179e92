pub mod correlation;
pub mod merge;

use log::{info, warn};

use crate::db::{
    energy::usage_archive::UsageRecord, open_meteo::weather_archive::WeatherRecord,
};

use self::{
    correlation::{correlate_by_region, Correlation, CorrelationResult},
    merge::{inner_join, MergedRecord},
};

/// Join the usage with the weather and correlate them by region.
///
/// If either input is empty nothing is computed and both outputs are empty.
pub fn merge_and_analyze(
    usage: &[UsageRecord],
    weather: &[WeatherRecord],
) -> (Vec<MergedRecord>, Vec<CorrelationResult>) {
    if usage.is_empty() || weather.is_empty() {
        warn!(
            "Empty input ({} usage rows, {} weather rows), cannot merge",
            usage.len(),
            weather.len()
        );
        return (Vec::new(), Vec::new());
    }

    let merged = inner_join(usage, weather);
    info!(
        "Merged {} rows from {} usage and {} weather rows",
        merged.len(),
        usage.len(),
        weather.len()
    );

    let results = correlate_by_region(&merged);
    for result in &results {
        match result.outcome {
            Correlation::Coefficient(r) => info!(
                "{} - correlation between usage_kwh and {}: {:.3}",
                result.region, result.metric, r
            ),
            outcome => warn!("{} - {}: {}", result.region, result.metric, outcome),
        }
    }
    (merged, results)
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use super::*;

    fn usage(day: i8, usage_kwh: f64) -> UsageRecord {
        UsageRecord {
            region: "R1".to_string(),
            date: date(2025, 1, day),
            usage_kwh,
            device_count: 40,
            uptime_pct: 99.0,
            error_rate_pct: 1.0,
        }
    }

    fn weather(day: i8, temperature_c: f64) -> WeatherRecord {
        WeatherRecord {
            region: Some("R1".to_string()),
            date: date(2025, 1, day),
            temperature_c,
            solar_radiation_wm2: None,
        }
    }

    #[test]
    fn perfectly_monotone_pair() {
        let us = vec![usage(1, 100.0), usage(2, 200.0)];
        let ws = vec![weather(1, 20.0), weather(2, 25.0)];
        let (merged, results) = merge_and_analyze(&us, &ws);
        assert_eq!(merged.len(), 2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].region, "R1");
        assert_eq!(results[0].outcome, Correlation::Coefficient(1.0));
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let us = vec![usage(1, 100.0), usage(2, 200.0)];
        let (merged, results) = merge_and_analyze(&us, &[]);
        assert!(merged.is_empty());
        assert!(results.is_empty());

        let ws = vec![weather(1, 20.0)];
        let (merged, results) = merge_and_analyze(&[], &ws);
        assert!(merged.is_empty() && results.is_empty());
    }

    #[test]
    fn no_matching_keys() {
        let us = vec![usage(1, 100.0)];
        let ws = vec![weather(2, 20.0)];
        let (merged, results) = merge_and_analyze(&us, &ws);
        assert!(merged.is_empty());
        assert!(results.is_empty());
    }
}
