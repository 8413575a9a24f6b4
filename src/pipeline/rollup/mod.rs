pub mod period;
pub mod summary;
pub mod engine;

pub use period::*;
pub use summary::*;
pub use engine::*;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::{Domain, Granularity};

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{domain} does not roll up at {granularity} granularity")]
    UnsupportedGranularity {
        domain: Domain,
        granularity: Granularity,
    },
}
