pub mod analysis;
pub mod db;
pub mod sql;
pub mod utils;
