pub mod region;
pub mod weather_archive;
