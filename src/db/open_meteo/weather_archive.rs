// Daily weather per region from the Open-Meteo API.
// See https://open-meteo.com/en/docs

use jiff::civil::Date;
use log::{error, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::db::energy::usage_archive::normalize_date;

use super::region::Region;

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Not set when the data was fetched for a single location.
    pub region: Option<String>,
    pub date: Date,
    pub temperature_c: f64,
    pub solar_radiation_wm2: Option<f64>,
}

#[derive(Error, Debug, PartialEq)]
#[error("unexpected response structure: {0}")]
pub struct SchemaError(pub String);

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {code}: {reason}")]
    Status { code: u16, reason: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Granularity of the series requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Frequency {
    Hourly,
    Daily,
}

impl Frequency {
    /// Name of the top level object in the response.
    pub fn key(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
        }
    }

    pub fn temperature_variable(&self) -> &'static str {
        match self {
            Frequency::Hourly => "temperature_2m",
            Frequency::Daily => "temperature_2m_max",
        }
    }

    /// Solar radiation in W/m² is only available as an hourly series.
    pub fn solar_variable(&self) -> Option<&'static str> {
        match self {
            Frequency::Hourly => Some("shortwave_radiation"),
            Frequency::Daily => None,
        }
    }

    fn variables(&self) -> String {
        match self.solar_variable() {
            Some(solar) => format!("{},{}", self.temperature_variable(), solar),
            None => self.temperature_variable().to_string(),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            _ => Err(format!("Failed to parse {s} as Frequency")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherQuery {
    pub start: Date,
    pub end: Date,
    pub frequency: Frequency,
    pub timezone: String,
}

/// Result of fetching several regions.  Regions that failed are listed with
/// their error and contribute no records.
#[derive(Debug, Default)]
pub struct WeatherFetch {
    pub records: Vec<WeatherRecord>,
    pub failures: Vec<(String, WeatherError)>,
}

pub struct OpenMeteoArchive {
    pub url: String,
    pub timeout: Duration,
}

impl OpenMeteoArchive {
    pub fn client(&self) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(self.timeout).build()
    }

    /// Fetch the daily weather for one location.  The records have no region.
    pub fn fetch_location(
        &self,
        client: &Client,
        latitude: f64,
        longitude: f64,
        query: &WeatherQuery,
    ) -> Result<Vec<WeatherRecord>, WeatherError> {
        let params = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("start_date", query.start.to_string()),
            ("end_date", query.end.to_string()),
            ("timezone", query.timezone.clone()),
            (query.frequency.key(), query.frequency.variables()),
        ];
        let response = client.get(&self.url).query(&params).send()?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let reason = response.text().unwrap_or_default();
            return Err(WeatherError::Status { code, reason });
        }
        let v: Value = response.json()?;
        Ok(parse_response(&v, query.frequency)?)
    }

    pub fn fetch_region(
        &self,
        client: &Client,
        region: &Region,
        query: &WeatherQuery,
    ) -> Result<Vec<WeatherRecord>, WeatherError> {
        let mut records = self.fetch_location(client, region.latitude, region.longitude, query)?;
        for record in records.iter_mut() {
            record.region = Some(region.name.clone());
        }
        Ok(records)
    }

    /// Fetch all the regions one at a time.  A failing region is logged and
    /// skipped, it never stops the other ones.
    pub fn fetch_regions(
        &self,
        client: &Client,
        regions: &[Region],
        query: &WeatherQuery,
    ) -> WeatherFetch {
        regions
            .iter()
            .map(|region| (region, self.fetch_region(client, region, query)))
            .fold(WeatherFetch::default(), |mut acc, (region, outcome)| {
                match outcome {
                    Ok(records) => {
                        info!("Fetched {} days of weather for {}", records.len(), region.name);
                        acc.records.extend(records);
                    }
                    Err(e) => {
                        error!("Failed to fetch weather for {}: {}", region.name, e);
                        acc.failures.push((region.name.clone(), e));
                    }
                }
                acc
            })
    }
}

/// Extract the daily means from an API response.  Sub-daily samples are
/// grouped by calendar date, null samples are skipped.  A day without any
/// temperature sample is dropped.
pub fn parse_response(v: &Value, frequency: Frequency) -> Result<Vec<WeatherRecord>, SchemaError> {
    let key = frequency.key();
    let series = v
        .get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaError(format!("missing '{}' object", key)))?;
    let array = |name: &str| series.get(name).and_then(Value::as_array);

    let times = array("time").ok_or_else(|| SchemaError(format!("missing '{}.time' array", key)))?;
    let temperature_variable = frequency.temperature_variable();
    let temperatures = array(temperature_variable)
        .ok_or_else(|| SchemaError(format!("missing '{}.{}' array", key, temperature_variable)))?;
    if temperatures.len() != times.len() {
        return Err(SchemaError(format!(
            "'{}' has {} values for {} timestamps",
            temperature_variable,
            temperatures.len(),
            times.len()
        )));
    }
    let solar = match frequency.solar_variable().and_then(|name| array(name).map(|xs| (name, xs))) {
        Some((name, xs)) if xs.len() != times.len() => {
            return Err(SchemaError(format!(
                "'{}' has {} values for {} timestamps",
                name,
                xs.len(),
                times.len()
            )))
        }
        Some((_, xs)) => Some(xs),
        None => None,
    };

    let mut days: BTreeMap<Date, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (i, time) in times.iter().enumerate() {
        let date = time
            .as_str()
            .and_then(normalize_date)
            .ok_or_else(|| SchemaError(format!("invalid timestamp {}", time)))?;
        let (temps, radiation) = days.entry(date).or_default();
        if let Some(x) = temperatures[i].as_f64() {
            temps.push(x);
        }
        if let Some(x) = solar.and_then(|xs| xs[i].as_f64()) {
            radiation.push(x);
        }
    }

    let records = days
        .into_iter()
        .filter(|(_, (temps, _))| !temps.is_empty())
        .map(|(date, (temps, radiation))| WeatherRecord {
            region: None,
            date,
            temperature_c: mean(&temps),
            solar_radiation_wm2: if radiation.is_empty() {
                None
            } else {
                Some(mean(&radiation))
            },
        })
        .collect();
    Ok(records)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;
    use serde_json::json;
    use std::error::Error;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::db::open_meteo::region::default_regions;

    fn query(frequency: Frequency) -> WeatherQuery {
        WeatherQuery {
            start: date(2025, 3, 18),
            end: date(2025, 3, 19),
            frequency,
            timezone: "Australia/Sydney".to_string(),
        }
    }

    fn hourly_body() -> Value {
        json!({
            "latitude": -37.75,
            "longitude": 145.0,
            "hourly": {
                "time": ["2025-03-18T00:00", "2025-03-18T12:00", "2025-03-19T00:00", "2025-03-19T12:00"],
                "temperature_2m": [18.0, 24.0, 20.0, null],
                "shortwave_radiation": [0.0, 800.0, null, null]
            }
        })
    }

    #[test]
    fn aggregate_hourly_to_daily_means() -> Result<(), Box<dyn Error>> {
        let xs = parse_response(&hourly_body(), Frequency::Hourly)?;
        assert_eq!(
            xs,
            vec![
                WeatherRecord {
                    region: None,
                    date: date(2025, 3, 18),
                    temperature_c: 21.0,
                    solar_radiation_wm2: Some(400.0),
                },
                WeatherRecord {
                    region: None,
                    date: date(2025, 3, 19),
                    temperature_c: 20.0,
                    solar_radiation_wm2: None,
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn parse_daily_series() -> Result<(), Box<dyn Error>> {
        let v = json!({
            "daily": {
                "time": ["2025-03-18", "2025-03-19", "2025-03-20"],
                "temperature_2m_max": [25.1, null, 27.3]
            }
        });
        let xs = parse_response(&v, Frequency::Daily)?;
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[1].date, date(2025, 3, 20));
        assert_eq!(xs[1].temperature_c, 27.3);
        assert_eq!(xs[1].solar_radiation_wm2, None);
        Ok(())
    }

    #[test]
    fn schema_errors() {
        let v = json!({"error": true, "reason": "Parameter 'latitude' is out of range"});
        assert_eq!(
            parse_response(&v, Frequency::Daily),
            Err(SchemaError("missing 'daily' object".to_string()))
        );
        // asked for daily data, got hourly
        assert!(parse_response(&hourly_body(), Frequency::Daily).is_err());

        let v = json!({"hourly": {"time": ["2025-03-18T00:00"], "temperature_2m": [1.0, 2.0]}});
        assert!(parse_response(&v, Frequency::Hourly).is_err());

        let v = json!({"daily": {"time": [20250318], "temperature_2m_max": [1.0]}});
        assert!(parse_response(&v, Frequency::Daily).is_err());
    }

    #[test]
    fn parse_frequency() {
        assert_eq!("Hourly".parse::<Frequency>(), Ok(Frequency::Hourly));
        assert_eq!("daily".parse::<Frequency>(), Ok(Frequency::Daily));
        assert!("weekly".parse::<Frequency>().is_err());
    }

    /// Serve `n` requests.  The Sydney latitude gets a response without the
    /// expected structure, everything else gets `hourly_body()`.
    fn serve(n: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().take(n) {
                let mut stream = stream.unwrap();
                let mut buf = [0u8; 4096];
                let len = stream.read(&mut buf).unwrap();
                let request = String::from_utf8_lossy(&buf[..len]).to_string();
                let body = if request.contains("latitude=-33.8688") {
                    json!({"reason": "no data"}).to_string()
                } else {
                    hourly_body().to_string()
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}/v1/forecast", addr)
    }

    #[test]
    fn one_failing_region_does_not_stop_the_others() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let regions = default_regions();
        let archive = OpenMeteoArchive {
            url: serve(regions.len()),
            timeout: Duration::from_secs(5),
        };
        let client = archive.client()?;
        let res = archive.fetch_regions(&client, &regions, &query(Frequency::Hourly));

        assert_eq!(res.failures.len(), 1);
        assert_eq!(res.failures[0].0, "Sydney");
        assert!(matches!(res.failures[0].1, WeatherError::Schema(_)));
        assert_eq!(res.records.len(), 6);
        assert!(res
            .records
            .iter()
            .all(|r| r.region.as_deref() != Some("Sydney")));
        assert_eq!(res.records[0].region.as_deref(), Some("Melbourne"));
        Ok(())
    }

    #[test]
    fn unreachable_api_gives_empty_result() -> Result<(), Box<dyn Error>> {
        let archive = OpenMeteoArchive {
            url: "http://127.0.0.1:9/v1/forecast".to_string(),
            timeout: Duration::from_secs(2),
        };
        let client = archive.client()?;
        let regions = default_regions();
        let res = archive.fetch_regions(&client, &regions, &query(Frequency::Daily));
        assert!(res.records.is_empty());
        assert_eq!(res.failures.len(), 4);
        Ok(())
    }

    #[test]
    fn slow_api_times_out_per_region() -> Result<(), Box<dyn Error>> {
        // accept the connections but never answer
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            let mut open = Vec::new();
            for stream in listener.incoming().flatten() {
                open.push(stream);
            }
        });
        let archive = OpenMeteoArchive {
            url: format!("http://{}/v1/forecast", addr),
            timeout: Duration::from_secs(1),
        };
        let client = archive.client()?;
        let regions = default_regions();
        let start = Instant::now();
        let res = archive.fetch_regions(&client, &regions, &query(Frequency::Hourly));
        let elapsed = start.elapsed();

        assert!(res.records.is_empty());
        assert_eq!(res.failures.len(), regions.len());
        assert!(res
            .failures
            .iter()
            .all(|(_, e)| matches!(e, WeatherError::Request(_))));
        assert!(elapsed >= Duration::from_millis(900 * regions.len() as u64));
        assert!(elapsed < Duration::from_secs(3 * regions.len() as u64));
        Ok(())
    }

    #[ignore]
    #[test]
    fn fetch_live() -> Result<(), Box<dyn Error>> {
        let archive = OpenMeteoArchive {
            url: OPEN_METEO_URL.to_string(),
            timeout: Duration::from_secs(10),
        };
        let client = archive.client()?;
        let melbourne = &default_regions()[0];
        let xs = archive.fetch_region(&client, melbourne, &query(Frequency::Hourly))?;
        assert_eq!(xs.len(), 2);
        Ok(())
    }
}
