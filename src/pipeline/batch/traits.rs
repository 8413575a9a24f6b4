//! Seams of the batch pipeline. The processor sees storage only through
//! `StatusStore`; the scheduler sees the processor only through `PassRunner`.

use std::time::Duration;

use rusqlite::Connection;

use super::error::BatchError;
use super::types::PassResult;
use crate::db::repository::StaleClaim;
use crate::models::{Domain, RawRecord};

/// Reads and moves raw-row lifecycle status.
///
/// Every move is a compare-and-set on the expected current status, so two
/// workers sharing a database never both act on the same row.
pub trait StatusStore: Send + Sync {
    /// Up to `limit` pending rows, oldest first.
    fn get_pending(
        &self,
        conn: &Connection,
        domain: Domain,
        limit: usize,
    ) -> Result<Vec<RawRecord>, BatchError>;

    /// pending -> processing. Returns the ids this call won.
    fn mark_processing(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
    ) -> Result<Vec<i64>, BatchError>;

    /// processing -> completed, including any derived categorized rows.
    fn mark_completed(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
    ) -> Result<usize, BatchError>;

    /// processing -> failed, with the reason recorded on every row.
    fn mark_failed(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
        reason: &str,
    ) -> Result<usize, BatchError>;

    /// pending -> insufficient. Terminal.
    fn mark_insufficient(
        &self,
        conn: &Connection,
        domain: Domain,
        id: i64,
        reason: &str,
    ) -> Result<bool, BatchError>;

    /// Pending rows across every domain.
    fn pending_count(&self, conn: &Connection) -> Result<i64, BatchError>;

    /// failed -> pending, optionally for one user only.
    fn requeue_failed(
        &self,
        conn: &Connection,
        domain: Domain,
        user_id: Option<i64>,
    ) -> Result<usize, BatchError>;

    /// Rows stuck in processing for longer than `older_than`.
    fn stale_processing(
        &self,
        conn: &Connection,
        older_than: Duration,
    ) -> Result<Vec<StaleClaim>, BatchError>;

    /// processing -> pending for rows claimed longer than `older_than` ago.
    /// Returns how many rows went back to the queue.
    fn requeue_stale_processing(
        &self,
        conn: &Connection,
        domain: Domain,
        older_than: Duration,
    ) -> Result<usize, BatchError>;
}

/// Something that can run one full processing pass. Blocking; the scheduler
/// calls it from a blocking thread.
pub trait PassRunner: Send + Sync {
    fn run_pass(&self) -> Result<PassResult, BatchError>;

    /// Pending rows across every domain, sampled to pick a debounce delay.
    fn pending_count(&self) -> Result<i64, BatchError>;
}
