pub mod energy_weather_archive;
pub mod generator;
pub mod usage_archive;
