use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of failure isolation: all rows of one user on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub user_id: i64,
    pub date: NaiveDate,
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassResult {
    pub pass_id: Uuid,
    /// Iterations that pulled at least one row.
    pub iterations: u32,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub insufficient: usize,
    pub groups_completed: usize,
    pub groups_failed: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl PassResult {
    pub fn empty() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            iterations: 0,
            claimed: 0,
            completed: 0,
            failed: 0,
            insufficient: 0,
            groups_completed: 0,
            groups_failed: 0,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }
}
