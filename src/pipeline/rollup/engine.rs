//! Recompute-from-source rollups.
//!
//! Every call deletes the period's rows and rebuilds them from the current
//! source rows, so replays are idempotent. Nothing here opens a transaction:
//! the batch processor wraps a whole group's ladder in one.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;

use super::period::{day_key, hour_key, period_key, source_granularity, source_key_range};
use super::summary::{bmi, combine, summarize};
use super::RollupError;
use crate::db::repository::{
    delete_aggregates, get_aggregates_in_range, get_categorized_in_range, get_measurements_in_range,
    upsert_aggregate,
};
use crate::models::{
    AggregateRecord, Domain, Granularity, MetricSummary, METRIC_BMI, METRIC_HEIGHT, METRIC_WEIGHT,
};

/// Recompute one period of `granularity` for a user. `anchor` is any date in
/// the period; for hourly, every hour of that date is recomputed. Returns
/// the number of aggregate rows written.
pub fn aggregate(
    conn: &Connection,
    domain: Domain,
    granularity: Granularity,
    user_id: i64,
    anchor: NaiveDate,
) -> Result<usize, RollupError> {
    let table = domain
        .aggregate_table(granularity)
        .ok_or(RollupError::UnsupportedGranularity { domain, granularity })?;

    let records = match granularity {
        Granularity::Hourly => {
            delete_aggregates(
                conn,
                table,
                user_id,
                &format!("{} 00:00", day_key(anchor)),
                &format!("{} 23:00", day_key(anchor)),
            )?;
            hourly_from_raw(conn, domain, user_id, anchor)?
        }
        Granularity::Daily => {
            let key = day_key(anchor);
            delete_aggregates(conn, table, user_id, &key, &key)?;
            match domain {
                Domain::Labs => daily_from_categorized(conn, user_id, anchor)?,
                Domain::Vitals | Domain::Nutrition => daily_from_raw(conn, domain, user_id, anchor)?,
            }
        }
        _ => {
            let key = period_key(granularity, anchor);
            delete_aggregates(conn, table, user_id, &key, &key)?;
            derived_from_finer(conn, domain, granularity, user_id, anchor)?
        }
    };

    for record in &records {
        upsert_aggregate(conn, table, record)?;
    }
    Ok(records.len())
}

/// Run the domain's whole ladder, finest first, for the periods containing
/// `date`. Coarser levels always re-run because finer rows for other days of
/// the same period may have changed since.
pub fn run_ladder(
    conn: &Connection,
    domain: Domain,
    user_id: i64,
    date: NaiveDate,
) -> Result<usize, RollupError> {
    let mut written = 0;
    for granularity in domain.ladder() {
        let n = aggregate(conn, domain, *granularity, user_id, date)?;
        tracing::debug!(%domain, %granularity, user_id, %date, rows = n, "Rollup recomputed");
        written += n;
    }
    Ok(written)
}

/// Per-metric values plus the first unit seen.
#[derive(Default)]
struct MetricBucket {
    values: Vec<f64>,
    unit: Option<String>,
    category: Option<String>,
    external_code: Option<String>,
}

impl MetricBucket {
    fn push(&mut self, value: f64, unit: Option<String>) {
        self.values.push(value);
        if self.unit.is_none() {
            self.unit = unit;
        }
    }
}

fn record(user_id: i64, period_key: String, metric: String, bucket: MetricBucket) -> Option<AggregateRecord> {
    let summary = summarize(&bucket.values)?;
    Some(AggregateRecord {
        user_id,
        period_key,
        metric,
        unit: bucket.unit,
        category: bucket.category,
        external_code: bucket.external_code,
        summary,
    })
}

fn hourly_from_raw(
    conn: &Connection,
    domain: Domain,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<AggregateRecord>, RollupError> {
    let points = get_measurements_in_range(conn, domain, user_id, date, date + Duration::days(1))?;
    let mut buckets: BTreeMap<(String, String), MetricBucket> = BTreeMap::new();
    for p in points {
        buckets
            .entry((hour_key(p.observed_at), p.metric))
            .or_default()
            .push(p.value, p.unit);
    }
    Ok(buckets
        .into_iter()
        .filter_map(|((key, metric), bucket)| record(user_id, key, metric, bucket))
        .collect())
}

fn daily_from_raw(
    conn: &Connection,
    domain: Domain,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<AggregateRecord>, RollupError> {
    let points = get_measurements_in_range(conn, domain, user_id, date, date + Duration::days(1))?;
    let mut buckets: BTreeMap<String, MetricBucket> = BTreeMap::new();
    for p in points {
        buckets.entry(p.metric).or_default().push(p.value, p.unit);
    }

    let key = day_key(date);
    let mut records: Vec<AggregateRecord> = buckets
        .into_iter()
        .filter_map(|(metric, bucket)| record(user_id, key.clone(), metric, bucket))
        .collect();

    if domain == Domain::Vitals {
        if let Some(derived) = derived_bmi(user_id, &key, &records) {
            records.retain(|r| r.metric != METRIC_BMI);
            records.push(derived);
        }
    }
    Ok(records)
}

/// BMI from the day's average weight and height, when both were measured.
fn derived_bmi(user_id: i64, key: &str, daily: &[AggregateRecord]) -> Option<AggregateRecord> {
    let avg_of = |metric: &str| daily.iter().find(|r| r.metric == metric).map(|r| r.summary.avg);
    let value = bmi(avg_of(METRIC_WEIGHT)?, avg_of(METRIC_HEIGHT)?)?;
    Some(AggregateRecord {
        user_id,
        period_key: key.to_string(),
        metric: METRIC_BMI.to_string(),
        unit: Some("kg/m2".into()),
        category: None,
        external_code: None,
        summary: MetricSummary {
            sum: value,
            avg: value,
            min: value,
            max: value,
            count: 1,
        },
    })
}

/// Labs aggregate per internal code, carrying the resolved category and code.
fn daily_from_categorized(
    conn: &Connection,
    user_id: i64,
    date: NaiveDate,
) -> Result<Vec<AggregateRecord>, RollupError> {
    let points = get_categorized_in_range(conn, user_id, date, date + Duration::days(1))?;
    let mut buckets: BTreeMap<String, MetricBucket> = BTreeMap::new();
    for p in points {
        let bucket = buckets.entry(p.internal_code).or_default();
        bucket.push(p.value, p.unit);
        bucket.category = Some(p.category);
        bucket.external_code = Some(p.external_code);
    }
    let key = day_key(date);
    Ok(buckets
        .into_iter()
        .filter_map(|(metric, bucket)| record(user_id, key.clone(), metric, bucket))
        .collect())
}

fn derived_from_finer(
    conn: &Connection,
    domain: Domain,
    granularity: Granularity,
    user_id: i64,
    anchor: NaiveDate,
) -> Result<Vec<AggregateRecord>, RollupError> {
    let unsupported = RollupError::UnsupportedGranularity { domain, granularity };
    let Some(source) = source_granularity(granularity) else {
        return Err(unsupported);
    };
    let Some(source_table) = domain.aggregate_table(source) else {
        return Err(unsupported);
    };
    let Some((from_key, to_key)) = source_key_range(granularity, anchor) else {
        return Err(unsupported);
    };

    let rows = get_aggregates_in_range(conn, source_table, user_id, &from_key, &to_key)?;
    let mut grouped: BTreeMap<String, Vec<AggregateRecord>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.metric.clone()).or_default().push(row);
    }

    let key = period_key(granularity, anchor);
    let mut records = Vec::with_capacity(grouped.len());
    for (metric, rows) in grouped {
        let parts: Vec<MetricSummary> = rows.iter().map(|r| r.summary).collect();
        let Some(summary) = combine(&parts) else {
            continue;
        };
        // Rows are in period order, so the last one carries the latest labels.
        let latest = rows.last();
        records.push(AggregateRecord {
            user_id,
            period_key: key.clone(),
            metric,
            unit: rows.iter().find_map(|r| r.unit.clone()),
            category: latest.and_then(|r| r.category.clone()),
            external_code: latest.and_then(|r| r.external_code.clone()),
            summary,
        });
    }
    Ok(records)
}
