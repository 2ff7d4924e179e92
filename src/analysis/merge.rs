use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::{
    energy::usage_archive::{deserialize_date, UsageRecord},
    open_meteo::weather_archive::WeatherRecord,
};

/// A usage record enriched with the weather of the same region and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub region: String,
    #[serde(deserialize_with = "deserialize_date")]
    pub date: Date,
    pub usage_kwh: f64,
    pub device_count: i64,
    pub uptime_pct: f64,
    pub error_rate_pct: f64,
    pub temperature_c: f64,
    pub solar_radiation_wm2: Option<f64>,
}

impl MergedRecord {
    pub fn new(usage: &UsageRecord, weather: &WeatherRecord) -> MergedRecord {
        MergedRecord {
            region: usage.region.clone(),
            date: usage.date,
            usage_kwh: usage.usage_kwh,
            device_count: usage.device_count,
            uptime_pct: usage.uptime_pct,
            error_rate_pct: usage.error_rate_pct,
            temperature_c: weather.temperature_c,
            solar_radiation_wm2: weather.solar_radiation_wm2,
        }
    }
}

/// Inner join on (region, date).  Weather records without a region match on
/// the date alone.  Usage rows without a matching weather record are dropped,
/// the output keeps the order of the usage rows.
///
/// Dates are compared exactly, so both sides need to have gone through the
/// same date normalization.
pub fn inner_join(usage: &[UsageRecord], weather: &[WeatherRecord]) -> Vec<MergedRecord> {
    let mut by_region: HashMap<(&str, Date), &WeatherRecord> = HashMap::new();
    let mut by_date: HashMap<Date, &WeatherRecord> = HashMap::new();
    for w in weather {
        match &w.region {
            Some(region) => by_region.entry((region.as_str(), w.date)).or_insert(w),
            None => by_date.entry(w.date).or_insert(w),
        };
    }

    usage
        .iter()
        .filter_map(|u| {
            let w = by_region
                .get(&(u.region.as_str(), u.date))
                .or_else(|| by_date.get(&u.date))?;
            Some(MergedRecord::new(u, w))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;
    use std::collections::HashSet;

    use super::*;

    fn usage(region: &str, date: Date, usage_kwh: f64) -> UsageRecord {
        UsageRecord {
            region: region.to_string(),
            date,
            usage_kwh,
            device_count: 40,
            uptime_pct: 99.0,
            error_rate_pct: 1.0,
        }
    }

    fn weather(region: Option<&str>, date: Date, temperature_c: f64) -> WeatherRecord {
        WeatherRecord {
            region: region.map(|r| r.to_string()),
            date,
            temperature_c,
            solar_radiation_wm2: None,
        }
    }

    #[test]
    fn join_drops_unmatched_keys() {
        let us = vec![
            usage("Sydney", date(2025, 3, 18), 100.0),
            usage("Sydney", date(2025, 3, 19), 110.0),
            usage("Perth", date(2025, 3, 18), 120.0),
            usage("Hobart", date(2025, 3, 18), 130.0),
        ];
        let ws = vec![
            weather(Some("Perth"), date(2025, 3, 18), 30.0),
            weather(Some("Sydney"), date(2025, 3, 18), 20.0),
            weather(Some("Sydney"), date(2025, 3, 20), 21.0),
        ];
        let xs = inner_join(&us, &ws);
        assert_eq!(xs.len(), 2);
        assert_eq!((xs[0].region.as_str(), xs[0].temperature_c), ("Sydney", 20.0));
        assert_eq!((xs[1].region.as_str(), xs[1].temperature_c), ("Perth", 30.0));

        // every merged key exists on both sides
        let usage_keys: HashSet<_> = us.iter().map(|u| (u.region.clone(), u.date)).collect();
        let weather_keys: HashSet<_> = ws
            .iter()
            .map(|w| (w.region.clone().unwrap(), w.date))
            .collect();
        for x in &xs {
            let key = (x.region.clone(), x.date);
            assert!(usage_keys.contains(&key) && weather_keys.contains(&key));
        }
        assert!(xs.len() <= usage_keys.len().min(weather_keys.len()));
    }

    #[test]
    fn join_on_date_for_single_location() {
        let us = vec![
            usage("Sydney", date(2025, 3, 18), 100.0),
            usage("Sydney", date(2025, 3, 19), 110.0),
        ];
        let ws = vec![weather(None, date(2025, 3, 19), 22.5)];
        let xs = inner_join(&us, &ws);
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].date, date(2025, 3, 19));
        assert_eq!(xs[0].usage_kwh, 110.0);
        assert_eq!(xs[0].temperature_c, 22.5);
    }
}
