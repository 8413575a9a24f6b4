//! Batch processor: drains pending raw rows into rollups.
//!
//! One pass loops until no domain has pending rows left:
//!
//! ```text
//! StatusStore ──▶ validate ──▶ claim ──▶ group by (user, date)
//!     (pending)   (insufficient)            │
//!                                           ▼
//!                        [labs] resolve terminology (outside tx)
//!                                           │
//!                      ┌────────── per group transaction ─────────┐
//!                      │ categorize ──▶ completed ──▶ run_ladder  │
//!                      └──────────────────────────────────────────┘
//!                                  on error: rollback, mark failed
//! ```
//!
//! A failing group never affects its siblings in the same iteration.

pub mod error;
pub mod processor;
pub mod runner;
pub mod store;
pub mod traits;
pub mod types;
pub mod validation;

pub use error::BatchError;
pub use processor::BatchProcessor;
pub use runner::SqlitePassRunner;
pub use store::SqliteStatusStore;
pub use traits::{PassRunner, StatusStore};
pub use types::{GroupKey, PassResult};
pub use validation::validate_record;
