use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::path::Path;

/// A named area with the coordinates used to query the weather for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Region {
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Region {
        Region {
            name: name.to_string(),
            latitude,
            longitude,
        }
    }
}

/// The regions covered by the APAC device fleet.
pub fn default_regions() -> Vec<Region> {
    vec![
        Region::new("Melbourne", -37.8136, 144.9631),
        Region::new("Sydney", -33.8688, 151.2093),
        Region::new("Brisbane", -27.4698, 153.0251),
        Region::new("Perth", -31.9505, 115.8605),
    ]
}

/// Read the regions from a json file with an array of
/// `{"name": ..., "latitude": ..., "longitude": ...}` objects.
pub fn read_regions(path: &Path) -> Result<Vec<Region>, Box<dyn Error>> {
    let regions: Vec<Region> = serde_json::from_reader(File::open(path)?)?;
    if regions.is_empty() {
        return Err(format!("No regions defined in {}", path.display()).into());
    }
    Ok(regions)
}
