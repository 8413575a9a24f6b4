use std::time::Duration;

use rusqlite::Connection;

use super::error::BatchError;
use super::traits::StatusStore;
use crate::db::repository::{
    claim_pending, count_pending, get_pending_raw, get_stale_processing, mark_categorized_completed,
    mark_raw_completed, mark_raw_failed, mark_raw_insufficient, requeue_failed, requeue_stale_processing,
    StaleClaim,
};
use crate::models::{Domain, RawRecord};

/// SQLite-backed status store over the raw tables.
pub struct SqliteStatusStore;

impl StatusStore for SqliteStatusStore {
    fn get_pending(
        &self,
        conn: &Connection,
        domain: Domain,
        limit: usize,
    ) -> Result<Vec<RawRecord>, BatchError> {
        Ok(get_pending_raw(conn, domain, limit)?)
    }

    fn mark_processing(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
    ) -> Result<Vec<i64>, BatchError> {
        Ok(claim_pending(conn, domain, ids)?)
    }

    fn mark_completed(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
    ) -> Result<usize, BatchError> {
        let moved = mark_raw_completed(conn, domain, ids)?;
        if domain == Domain::Labs {
            mark_categorized_completed(conn, &moved)?;
        }
        Ok(moved.len())
    }

    fn mark_failed(
        &self,
        conn: &Connection,
        domain: Domain,
        ids: &[i64],
        reason: &str,
    ) -> Result<usize, BatchError> {
        Ok(mark_raw_failed(conn, domain, ids, reason)?.len())
    }

    fn mark_insufficient(
        &self,
        conn: &Connection,
        domain: Domain,
        id: i64,
        reason: &str,
    ) -> Result<bool, BatchError> {
        Ok(mark_raw_insufficient(conn, domain, id, reason)?)
    }

    fn pending_count(&self, conn: &Connection) -> Result<i64, BatchError> {
        let mut total = 0;
        for domain in Domain::all() {
            total += count_pending(conn, *domain)?;
        }
        Ok(total)
    }

    fn requeue_failed(
        &self,
        conn: &Connection,
        domain: Domain,
        user_id: Option<i64>,
    ) -> Result<usize, BatchError> {
        let n = requeue_failed(conn, domain, user_id)?;
        if n > 0 {
            tracing::info!(%domain, user_id, rows = n, "Requeued failed rows");
        }
        Ok(n)
    }

    fn stale_processing(
        &self,
        conn: &Connection,
        older_than: Duration,
    ) -> Result<Vec<StaleClaim>, BatchError> {
        let secs = older_than.as_secs() as i64;
        let mut stale = Vec::new();
        for domain in Domain::all() {
            stale.extend(get_stale_processing(conn, *domain, secs)?);
        }
        Ok(stale)
    }

    fn requeue_stale_processing(
        &self,
        conn: &Connection,
        domain: Domain,
        older_than: Duration,
    ) -> Result<usize, BatchError> {
        let n = requeue_stale_processing(conn, domain, older_than.as_secs() as i64)?;
        if n > 0 {
            tracing::warn!(%domain, rows = n, older_than_secs = older_than.as_secs(), "Requeued stale claims");
        }
        Ok(n)
    }
}
