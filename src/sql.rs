pub mod export;
pub mod named_queries;
