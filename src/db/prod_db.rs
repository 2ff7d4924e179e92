use log::{info, warn};
use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{
    energy::{energy_weather_archive::EnergyWeatherArchive, usage_archive::EnergyUsageArchive},
    open_meteo::{
        region::{default_regions, read_regions, Region},
        weather_archive::{OpenMeteoArchive, OPEN_METEO_URL},
    },
};
use crate::sql::export::QueryExporter;

/// Locations of the archives.  Everything lives under `ARCHIVE_DIR`
/// (default `./archive`), see [`load_env`] for how the variables are set.
pub struct ProdDb {}

impl ProdDb {
    pub fn archive_dir() -> String {
        env::var("ARCHIVE_DIR").unwrap_or_else(|_| "archive".to_string())
    }

    pub fn duckdb_path() -> String {
        ProdDb::archive_dir() + "/DuckDB/energy_usage.duckdb"
    }

    pub fn energy_usage() -> EnergyUsageArchive {
        EnergyUsageArchive {
            base_dir: ProdDb::archive_dir() + "/EnergyUsage",
            default_region: env::var("DEFAULT_REGION").ok(),
        }
    }

    pub fn energy_weather() -> EnergyWeatherArchive {
        EnergyWeatherArchive {
            base_dir: ProdDb::archive_dir() + "/EnergyWeather",
            duckdb_path: ProdDb::duckdb_path(),
            table: "energy_usage".to_string(),
        }
    }

    pub fn open_meteo() -> OpenMeteoArchive {
        let timeout = env::var("OPEN_METEO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        OpenMeteoArchive {
            url: env::var("OPEN_METEO_URL").unwrap_or_else(|_| OPEN_METEO_URL.to_string()),
            timeout: Duration::from_secs(timeout),
        }
    }

    pub fn query_exporter() -> QueryExporter {
        QueryExporter {
            out_dir: PathBuf::from(ProdDb::archive_dir() + "/exports"),
            extension: "csv".to_string(),
        }
    }

    /// Regions from `$CONFIG_DIR/regions.json` if the file exists, the
    /// default APAC regions otherwise.
    pub fn regions() -> Result<Vec<Region>, Box<dyn Error>> {
        if let Ok(dir) = env::var("CONFIG_DIR") {
            let path = Path::new(&dir).join("regions.json");
            if path.exists() {
                info!("Reading regions from {}", path.display());
                return read_regions(&path);
            }
        }
        Ok(default_regions())
    }
}

/// Load the environment variables from `.env/<env_name>.env`, if the file exists.
pub fn load_env(env_name: &str) {
    let path = format!(".env/{}.env", env_name);
    if let Err(e) = dotenvy::from_path(Path::new(&path)) {
        warn!("Not loading {}: {}", path, e);
    }
}
