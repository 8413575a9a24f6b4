use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::pipeline::rollup::RollupError;
use crate::pipeline::terminology::TerminologyError;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Terminology error: {0}")]
    Terminology(#[from] TerminologyError),

    #[error("Rollup error: {0}")]
    Rollup(#[from] RollupError),

    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pass task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for BatchError {
    fn from(e: rusqlite::Error) -> Self {
        BatchError::Database(DatabaseError::from(e))
    }
}
