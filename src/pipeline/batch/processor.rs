use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::error::BatchError;
use super::traits::StatusStore;
use super::types::{GroupKey, PassResult};
use super::validation::validate_record;
use crate::config::ProcessorConfig;
use crate::db::repository::upsert_categorized_lab;
use crate::models::{AggregationStatus, CategorizedLab, Domain, RawRecord};
use crate::pipeline::rollup::run_ladder;
use crate::pipeline::terminology::{LabelContext, TerminologyResolver};

/// Drains pending rows of every domain into rollups.
pub struct BatchProcessor {
    store: Box<dyn StatusStore>,
    resolver: TerminologyResolver,
    config: ProcessorConfig,
}

impl BatchProcessor {
    pub fn new(store: Box<dyn StatusStore>, resolver: TerminologyResolver, config: ProcessorConfig) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Loop iterations until one pulls nothing from any domain.
    ///
    /// Group failures are recorded on their rows and counted in the result.
    /// Only store-level errors abort the pass.
    pub fn run_pass(&self, conn: &Connection) -> Result<PassResult, BatchError> {
        let start = Instant::now();
        let mut result = PassResult::empty();
        tracing::info!(pass_id = %result.pass_id, "Processing pass started");

        loop {
            let pulled = self.run_iteration(conn, &mut result)?;
            if pulled == 0 {
                break;
            }
            result.iterations += 1;
            if !self.config.iteration_sleep.is_zero() {
                std::thread::sleep(self.config.iteration_sleep);
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            pass_id = %result.pass_id,
            iterations = result.iterations,
            completed = result.completed,
            failed = result.failed,
            insufficient = result.insufficient,
            duration_ms = result.duration_ms,
            "Processing pass finished"
        );
        Ok(result)
    }

    /// One pull/validate/claim/process round over every domain. Returns the
    /// number of rows pulled.
    pub fn run_iteration(&self, conn: &Connection, result: &mut PassResult) -> Result<usize, BatchError> {
        let mut pulled = 0;

        for &domain in Domain::all() {
            let pending = self.store.get_pending(conn, domain, self.config.batch_size)?;
            if pending.is_empty() {
                continue;
            }
            pulled += pending.len();

            let mut valid = Vec::with_capacity(pending.len());
            for record in pending {
                match validate_record(&record) {
                    Ok(()) => valid.push(record),
                    Err(e) => {
                        let reason = e.to_string();
                        if self.store.mark_insufficient(conn, domain, record.id, &reason)? {
                            result.insufficient += 1;
                        }
                        tracing::debug!(%domain, id = record.id, %reason, "Row rejected");
                    }
                }
            }

            let ids: Vec<i64> = valid.iter().map(|r| r.id).collect();
            let claimed: HashSet<i64> = self
                .store
                .mark_processing(conn, domain, &ids)?
                .into_iter()
                .collect();
            result.claimed += claimed.len();

            let groups = group_records(valid.into_iter().filter(|r| claimed.contains(&r.id)));
            for (key, records) in groups {
                let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
                match self.process_group(conn, domain, key, &records) {
                    Ok(completed) => {
                        result.completed += completed;
                        result.groups_completed += 1;
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        tracing::warn!(
                            %domain,
                            user_id = key.user_id,
                            date = %key.date,
                            rows = ids.len(),
                            error = %reason,
                            "Group failed"
                        );
                        result.failed += self.store.mark_failed(conn, domain, &ids, &reason)?;
                        result.groups_failed += 1;
                        result
                            .errors
                            .push(format!("{domain} user {} on {}: {reason}", key.user_id, key.date));
                    }
                }
            }
        }

        Ok(pulled)
    }

    /// Categorize (labs), roll up and complete one group atomically.
    /// Dropping the transaction on any error rolls back every write.
    fn process_group(
        &self,
        conn: &Connection,
        domain: Domain,
        key: GroupKey,
        records: &[RawRecord],
    ) -> Result<usize, BatchError> {
        // Terminology lookups may block on the network; keep them outside the
        // write lock.
        let categorized = match domain {
            Domain::Labs => self.categorize(conn, key, records)?,
            Domain::Vitals | Domain::Nutrition => Vec::new(),
        };

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        for lab in &categorized {
            upsert_categorized_lab(&tx, lab)?;
        }
        // The ladder reads only completed rows, so this group's rows complete
        // first. A failure below rolls the completion back with the aggregates.
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let completed = self.store.mark_completed(&tx, domain, &ids)?;
        let rows = run_ladder(&tx, domain, key.user_id, key.date)?;
        tx.commit()?;

        tracing::debug!(%domain, user_id = key.user_id, date = %key.date, completed, rows, "Group rolled up");
        Ok(completed)
    }

    fn categorize(
        &self,
        conn: &Connection,
        key: GroupKey,
        records: &[RawRecord],
    ) -> Result<Vec<CategorizedLab>, BatchError> {
        let mut labs = Vec::with_capacity(records.len());
        for record in records {
            let (Some(test_name), Some(value)) = (record.label.as_deref(), record.value) else {
                return Err(BatchError::Validation(format!(
                    "lab {} lost a required field after validation",
                    record.id
                )));
            };
            let context = LabelContext {
                unit: record.unit.clone(),
                reference_range: record.reference_range.clone(),
                category_hint: record.category_hint.clone(),
            };
            let resolution = self.resolver.resolve(conn, test_name, &context)?;

            labs.push(CategorizedLab {
                id: CategorizedLab::make_id(record.user_id, &resolution.external_code, record.id),
                raw_lab_id: record.id,
                user_id: record.user_id,
                test_name: test_name.to_string(),
                display_name: resolution.display_name,
                value,
                unit: record.unit.clone(),
                test_date: key.date,
                internal_code: resolution.internal_code,
                external_code: resolution.external_code,
                category: resolution.category,
                status: AggregationStatus::Processing,
            });
        }
        Ok(labs)
    }
}

/// Bucket validated rows by (user, date), in key order.
fn group_records(records: impl Iterator<Item = RawRecord>) -> BTreeMap<GroupKey, Vec<RawRecord>> {
    let mut groups: BTreeMap<GroupKey, Vec<RawRecord>> = BTreeMap::new();
    for record in records {
        if let Some(date) = record.observed_date() {
            groups
                .entry(GroupKey {
                    user_id: record.user_id,
                    date,
                })
                .or_default()
                .push(record);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveDateTime};

    use crate::config::ResolverConfig;
    use crate::db::repository::{
        get_aggregate, get_categorized_lab, get_raw_record, insert_raw_lab, insert_raw_nutrition,
        insert_raw_vital,
    };
    use crate::db::sqlite::{open_database, open_memory_database};
    use crate::models::{
        NewLabResult, NewNutritionEntry, NewVitalSign, DATETIME_FORMAT, UNKNOWN_EXTERNAL_CODE,
    };
    use crate::pipeline::batch::store::SqliteStatusStore;
    use crate::pipeline::terminology::{internal_code, MappingCache};

    fn processor(batch_size: usize) -> BatchProcessor {
        BatchProcessor::new(
            Box::new(SqliteStatusStore),
            TerminologyResolver::new(Arc::new(MappingCache::new()), ResolverConfig::default()),
            ProcessorConfig {
                batch_size,
                iteration_sleep: Duration::ZERO,
            },
        )
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn heart_rate(conn: &Connection, user_id: i64, value: f64, time: &str) -> i64 {
        insert_raw_vital(conn, &NewVitalSign::new(user_id, "heart_rate", value, "bpm", at(time))).unwrap()
    }

    fn status(conn: &Connection, domain: Domain, id: i64) -> AggregationStatus {
        get_raw_record(conn, domain, id).unwrap().unwrap().status
    }

    #[test]
    fn pass_rolls_up_vitals_and_completes_rows() {
        let conn = open_memory_database().unwrap();
        let ids = [
            heart_rate(&conn, 42, 60.0, "2024-03-04 08:00:00"),
            heart_rate(&conn, 42, 80.0, "2024-03-04 20:00:00"),
            heart_rate(&conn, 42, 70.0, "2024-03-06 09:30:00"),
        ];

        let result = processor(200).run_pass(&conn).unwrap();
        assert_eq!(result.iterations, 1);
        assert_eq!(result.claimed, 3);
        assert_eq!(result.completed, 3);
        assert_eq!(result.groups_completed, 2);
        assert_eq!(result.failed, 0);
        for id in ids {
            assert_eq!(status(&conn, Domain::Vitals, id), AggregationStatus::Completed);
        }

        let daily = get_aggregate(&conn, "vitals_daily", 42, "2024-03-04", "heart_rate")
            .unwrap()
            .unwrap();
        assert_eq!(daily.summary.avg, 70.0);
        assert_eq!(daily.summary.count, 2);

        let weekly = get_aggregate(&conn, "vitals_weekly", 42, "2024-03-04", "heart_rate")
            .unwrap()
            .unwrap();
        assert_eq!(weekly.summary.count, 3);
        assert_eq!(weekly.summary.sum, 210.0);
        assert_eq!(weekly.summary.min, 60.0);
        assert_eq!(weekly.summary.max, 80.0);
    }

    #[test]
    fn incomplete_rows_become_insufficient() {
        let conn = open_memory_database().unwrap();
        let good = heart_rate(&conn, 1, 60.0, "2024-03-04 08:00:00");
        let bad = insert_raw_vital(
            &conn,
            &NewVitalSign {
                user_id: 1,
                metric: Some("heart_rate".into()),
                value: None,
                unit: Some("bpm".into()),
                occurred_at: Some(at("2024-03-04 09:00:00")),
            },
        )
        .unwrap();

        let result = processor(200).run_pass(&conn).unwrap();
        assert_eq!(result.insufficient, 1);
        assert_eq!(result.completed, 1);

        let rejected = get_raw_record(&conn, Domain::Vitals, bad).unwrap().unwrap();
        assert_eq!(rejected.status, AggregationStatus::Insufficient);
        assert_eq!(rejected.error_reason.as_deref(), Some("missing required field: value"));
        assert_eq!(status(&conn, Domain::Vitals, good), AggregationStatus::Completed);
    }

    #[test]
    fn failing_group_does_not_affect_siblings() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_user_7 BEFORE INSERT ON vitals_daily
             WHEN NEW.user_id = 7
             BEGIN SELECT RAISE(ABORT, 'daily write rejected'); END;",
        )
        .unwrap();
        let doomed = heart_rate(&conn, 7, 60.0, "2024-03-04 08:00:00");
        let fine = heart_rate(&conn, 8, 65.0, "2024-03-04 08:00:00");

        let result = processor(200).run_pass(&conn).unwrap();
        assert_eq!(result.groups_failed, 1);
        assert_eq!(result.groups_completed, 1);
        assert_eq!(result.errors.len(), 1);

        let failed = get_raw_record(&conn, Domain::Vitals, doomed).unwrap().unwrap();
        assert_eq!(failed.status, AggregationStatus::Failed);
        assert!(failed.error_reason.unwrap().contains("daily write rejected"));
        assert_eq!(status(&conn, Domain::Vitals, fine), AggregationStatus::Completed);

        // The hourly rows written before the failure were rolled back.
        assert!(get_aggregate(&conn, "vitals_hourly", 7, "2024-03-04 08:00", "heart_rate")
            .unwrap()
            .is_none());
        assert!(get_aggregate(&conn, "vitals_daily", 8, "2024-03-04", "heart_rate")
            .unwrap()
            .is_some());
    }

    #[test]
    fn rows_claimed_by_another_worker_stay_out_of_aggregates() {
        let conn = open_memory_database().unwrap();
        let mine = heart_rate(&conn, 1, 60.0, "2024-03-04 08:00:00");
        let theirs = heart_rate(&conn, 1, 200.0, "2024-03-04 09:00:00");
        // Another worker holds this row mid-group.
        SqliteStatusStore.mark_processing(&conn, Domain::Vitals, &[theirs]).unwrap();

        let result = processor(200).run_pass(&conn).unwrap();
        assert_eq!(result.completed, 1);
        assert_eq!(status(&conn, Domain::Vitals, mine), AggregationStatus::Completed);

        // The other worker's group then fails.
        SqliteStatusStore
            .mark_failed(&conn, Domain::Vitals, &[theirs], "daily write rejected")
            .unwrap();

        let daily = get_aggregate(&conn, "vitals_daily", 1, "2024-03-04", "heart_rate")
            .unwrap()
            .unwrap();
        assert_eq!(daily.summary.count, 1);
        assert_eq!(daily.summary.sum, 60.0);
        assert!(get_aggregate(&conn, "vitals_hourly", 1, "2024-03-04 09:00", "heart_rate")
            .unwrap()
            .is_none());
    }

    #[test]
    fn labs_are_categorized_before_rollup() {
        let conn = open_memory_database().unwrap();
        let mut lab = NewLabResult::new(5, "Hemoglobin A1c", 6.1, "%", day(2024, 2, 14));
        lab.reference_range = Some("4.0-5.6".into());
        let id = insert_raw_lab(&conn, &lab).unwrap();

        let result = processor(200).run_pass(&conn).unwrap();
        assert_eq!(result.completed, 1);

        let categorized = get_categorized_lab(&conn, id).unwrap().unwrap();
        assert_eq!(categorized.category, "Diabetes");
        assert_eq!(categorized.external_code, UNKNOWN_EXTERNAL_CODE);
        assert_eq!(categorized.status, AggregationStatus::Completed);
        assert_eq!(categorized.id, format!("5:{UNKNOWN_EXTERNAL_CODE}:{id}"));

        let code = internal_code("hemoglobin a1c");
        let yearly = get_aggregate(&conn, "labs_yearly", 5, "2024", &code).unwrap().unwrap();
        assert_eq!(yearly.category.as_deref(), Some("Diabetes"));
        assert_eq!(yearly.summary.avg, 6.1);
        assert!(get_aggregate(&conn, "labs_quarterly", 5, "2024-Q1", &code).unwrap().is_some());
    }

    #[test]
    fn small_batches_loop_until_drained() {
        let conn = open_memory_database().unwrap();
        for hour in 0..3 {
            heart_rate(&conn, 1, 60.0 + hour as f64, &format!("2024-03-04 0{hour}:00:00"));
        }
        insert_raw_nutrition(&conn, &NewNutritionEntry::new(1, "protein", 30.0, "g", day(2024, 3, 4))).unwrap();

        let result = processor(1).run_pass(&conn).unwrap();
        assert_eq!(result.iterations, 3);
        assert_eq!(result.completed, 4);
        assert_eq!(SqliteStatusStore.pending_count(&conn).unwrap(), 0);

        let again = processor(1).run_pass(&conn).unwrap();
        assert_eq!(again.iterations, 0);
        assert_eq!(again.claimed, 0);
    }

    #[test]
    fn concurrent_workers_never_double_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        {
            let conn = open_database(&path).unwrap();
            for user in 1..=4 {
                for minute in 0..10 {
                    heart_rate(&conn, user, 60.0 + minute as f64, &format!("2024-03-04 08:{minute:02}:00"));
                }
            }
        }

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = open_database(&path).unwrap();
                    processor(5).run_pass(&conn).unwrap()
                })
            })
            .collect();
        let results: Vec<PassResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let claimed: usize = results.iter().map(|r| r.claimed).sum();
        let completed: usize = results.iter().map(|r| r.completed).sum();
        assert_eq!(claimed, 40);
        assert_eq!(completed, 40);

        let conn = open_database(&path).unwrap();
        for user in 1..=4 {
            let daily = get_aggregate(&conn, "vitals_daily", user, "2024-03-04", "heart_rate")
                .unwrap()
                .unwrap();
            assert_eq!(daily.summary.count, 10);
        }
    }
}
