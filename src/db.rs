pub mod energy;
pub mod open_meteo;
pub mod prod_db;
