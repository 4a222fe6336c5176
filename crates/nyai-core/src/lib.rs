pub mod assistant;
pub mod citation;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod flow;
pub mod flows;
pub mod history;
pub mod parser;
pub mod retrieval;
pub mod types;

pub use types::*;
