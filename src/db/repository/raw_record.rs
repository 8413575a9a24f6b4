use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;
use crate::models::{
    parse_observed, AggregationStatus, Domain, NewLabResult, NewNutritionEntry, NewVitalSign,
    RawRecord, DATETIME_FORMAT, DATE_FORMAT,
};

// ═══════════════════════════════════════════
// Ingestion
// ═══════════════════════════════════════════

/// Insert one vital sign as a pending raw row. Returns the row id.
pub fn insert_raw_vital(conn: &Connection, vital: &NewVitalSign) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO raw_vitals (user_id, metric, value, unit, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            vital.user_id,
            vital.metric,
            vital.value,
            vital.unit,
            vital.occurred_at.map(|t| t.format(DATETIME_FORMAT).to_string()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert one nutrient amount as a pending raw row. Returns the row id.
pub fn insert_raw_nutrition(
    conn: &Connection,
    entry: &NewNutritionEntry,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO raw_nutrition (user_id, nutrient, value, unit, meal_date, meal_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.user_id,
            entry.nutrient,
            entry.value,
            entry.unit,
            entry.meal_date.map(|d| d.format(DATE_FORMAT).to_string()),
            entry.meal_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert one lab result as a pending raw row. Returns the row id.
pub fn insert_raw_lab(conn: &Connection, lab: &NewLabResult) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO raw_labs (user_id, test_name, value, unit, reference_range, test_date, category_hint)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lab.user_id,
            lab.test_name,
            lab.value,
            lab.unit,
            lab.reference_range,
            lab.test_date.map(|d| d.format(DATE_FORMAT).to_string()),
            lab.category_hint,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ═══════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════

fn select_raw_columns(domain: Domain) -> String {
    let (reference_range, category_hint) = match domain {
        Domain::Labs => ("reference_range", "category_hint"),
        Domain::Vitals | Domain::Nutrition => ("NULL", "NULL"),
    };
    format!(
        "SELECT id, user_id, {label}, value, unit, {time}, {reference_range}, {category_hint},
                aggregation_status, error_reason, created_at
         FROM {table}",
        label = domain.label_column(),
        time = domain.time_column(),
        table = domain.raw_table(),
    )
}

struct RawRow {
    id: i64,
    user_id: i64,
    label: Option<String>,
    value: Option<f64>,
    unit: Option<String>,
    observed: Option<String>,
    reference_range: Option<String>,
    category_hint: Option<String>,
    status: String,
    error_reason: Option<String>,
    created_at: String,
}

fn raw_row_from_rusqlite(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        value: row.get(3)?,
        unit: row.get(4)?,
        observed: row.get(5)?,
        reference_range: row.get(6)?,
        category_hint: row.get(7)?,
        status: row.get(8)?,
        error_reason: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn raw_record_from_row(domain: Domain, row: RawRow) -> Result<RawRecord, DatabaseError> {
    Ok(RawRecord {
        id: row.id,
        domain,
        user_id: row.user_id,
        label: row.label,
        value: row.value,
        unit: row.unit,
        observed_at: row.observed.as_deref().and_then(|s| parse_observed(domain, s)),
        reference_range: row.reference_range,
        category_hint: row.category_hint,
        status: row.status.parse()?,
        error_reason: row.error_reason,
        created_at: row.created_at,
    })
}

/// Up to `limit` pending rows of one domain, oldest first.
pub fn get_pending_raw(
    conn: &Connection,
    domain: Domain,
    limit: usize,
) -> Result<Vec<RawRecord>, DatabaseError> {
    let sql = format!(
        "{} WHERE aggregation_status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?1",
        select_raw_columns(domain)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit as i64], raw_row_from_rusqlite)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(raw_record_from_row(domain, row?)?);
    }
    Ok(records)
}

pub fn get_raw_record(
    conn: &Connection,
    domain: Domain,
    id: i64,
) -> Result<Option<RawRecord>, DatabaseError> {
    let sql = format!("{} WHERE id = ?1", select_raw_columns(domain));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], raw_row_from_rusqlite)?;
    match rows.next() {
        Some(row) => Ok(Some(raw_record_from_row(domain, row?)?)),
        None => Ok(None),
    }
}

pub fn count_pending(conn: &Connection, domain: Domain) -> Result<i64, DatabaseError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE aggregation_status = 'pending'",
        domain.raw_table()
    );
    let count = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

/// A value observed for one metric, as read by the rollup engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    pub metric: String,
    pub value: f64,
    pub unit: Option<String>,
    pub observed_at: NaiveDateTime,
}

/// Completed rows of a user in `[from, to)`.
///
/// Only completed rows contribute to an aggregate: a row still processing may
/// belong to another worker's group that has yet to succeed or fail.
pub fn get_measurements_in_range(
    conn: &Connection,
    domain: Domain,
    user_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<MeasurementPoint>, DatabaseError> {
    // Date strings sort before any timestamp on the same day, so one pair of
    // bounds works for both timestamp and date columns.
    let sql = format!(
        "SELECT {label}, value, unit, {time} FROM {table}
         WHERE user_id = ?1 AND {time} >= ?2 AND {time} < ?3
           AND aggregation_status = 'completed'
           AND {label} IS NOT NULL AND value IS NOT NULL
         ORDER BY {time} ASC, id ASC",
        label = domain.label_column(),
        time = domain.time_column(),
        table = domain.raw_table(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            user_id,
            from.format(DATE_FORMAT).to_string(),
            to.format(DATE_FORMAT).to_string(),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    )?;

    let mut points = Vec::new();
    for row in rows {
        let (metric, value, unit, observed) = row?;
        if let Some(observed_at) = parse_observed(domain, &observed) {
            points.push(MeasurementPoint {
                metric,
                value,
                unit,
                observed_at,
            });
        }
    }
    Ok(points)
}

// ═══════════════════════════════════════════
// Status transitions
// ═══════════════════════════════════════════

/// Claim pending rows for this worker. Each row is moved with a
/// compare-and-set on `pending`, so a row another worker already claimed is
/// skipped. Returns the ids this call actually claimed.
pub fn claim_pending(
    conn: &Connection,
    domain: Domain,
    ids: &[i64],
) -> Result<Vec<i64>, DatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let claimed = {
        let sql = format!(
            "UPDATE {} SET aggregation_status = 'processing', error_reason = NULL,
                    updated_at = datetime('now')
             WHERE id = ?1 AND aggregation_status = 'pending'",
            domain.raw_table()
        );
        let mut stmt = tx.prepare(&sql)?;
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if stmt.execute(params![id])? == 1 {
                claimed.push(*id);
            }
        }
        claimed
    };
    tx.commit()?;
    Ok(claimed)
}

/// Move rows `from -> to`, skipping any row not currently in `from`.
/// Returns the ids that transitioned. Runs inside the caller's transaction,
/// if any.
fn transition(
    conn: &Connection,
    domain: Domain,
    ids: &[i64],
    from: AggregationStatus,
    to: AggregationStatus,
    reason: Option<&str>,
) -> Result<Vec<i64>, DatabaseError> {
    if !from.can_transition_to(to) {
        return Err(DatabaseError::IllegalTransition {
            table: domain.raw_table().to_string(),
            id: ids.first().copied().unwrap_or_default(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let sql = format!(
        "UPDATE {} SET aggregation_status = ?1, error_reason = ?2, updated_at = datetime('now')
         WHERE id = ?3 AND aggregation_status = ?4",
        domain.raw_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut moved = Vec::with_capacity(ids.len());
    for id in ids {
        if stmt.execute(params![to.as_str(), reason, id, from.as_str()])? == 1 {
            moved.push(*id);
        }
    }
    Ok(moved)
}

pub fn mark_raw_completed(
    conn: &Connection,
    domain: Domain,
    ids: &[i64],
) -> Result<Vec<i64>, DatabaseError> {
    transition(
        conn,
        domain,
        ids,
        AggregationStatus::Processing,
        AggregationStatus::Completed,
        None,
    )
}

pub fn mark_raw_failed(
    conn: &Connection,
    domain: Domain,
    ids: &[i64],
    reason: &str,
) -> Result<Vec<i64>, DatabaseError> {
    transition(
        conn,
        domain,
        ids,
        AggregationStatus::Processing,
        AggregationStatus::Failed,
        Some(reason),
    )
}

/// Terminal validation failure. Only legal straight from `pending`.
pub fn mark_raw_insufficient(
    conn: &Connection,
    domain: Domain,
    id: i64,
    reason: &str,
) -> Result<bool, DatabaseError> {
    let moved = transition(
        conn,
        domain,
        &[id],
        AggregationStatus::Pending,
        AggregationStatus::Insufficient,
        Some(reason),
    )?;
    Ok(!moved.is_empty())
}

/// Explicit re-trigger: put failed rows back in the queue.
pub fn requeue_failed(
    conn: &Connection,
    domain: Domain,
    user_id: Option<i64>,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET aggregation_status = 'pending', error_reason = NULL,
                updated_at = datetime('now')
         WHERE aggregation_status = 'failed' AND (?1 IS NULL OR user_id = ?1)",
        domain.raw_table()
    );
    let n = conn.execute(&sql, params![user_id])?;
    Ok(n)
}

/// A row left in `processing` longer than expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleClaim {
    pub domain: Domain,
    pub id: i64,
    pub user_id: i64,
    pub claimed_at: String,
}

/// Rows of one domain whose last status write is older than `older_than_secs`.
pub fn get_stale_processing(
    conn: &Connection,
    domain: Domain,
    older_than_secs: i64,
) -> Result<Vec<StaleClaim>, DatabaseError> {
    let sql = format!(
        "SELECT id, user_id, updated_at FROM {}
         WHERE aggregation_status = 'processing' AND updated_at <= datetime('now', ?1)
         ORDER BY updated_at ASC, id ASC",
        domain.raw_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format!("-{older_than_secs} seconds")], |row| {
        Ok(StaleClaim {
            domain,
            id: row.get(0)?,
            user_id: row.get(1)?,
            claimed_at: row.get(2)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Put rows abandoned in `processing` for longer than `older_than_secs` back
/// in the queue. The age check and the status check are one compare-and-set,
/// so a claim refreshed by a live worker is left alone.
pub fn requeue_stale_processing(
    conn: &Connection,
    domain: Domain,
    older_than_secs: i64,
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET aggregation_status = 'pending', error_reason = NULL,
                updated_at = datetime('now')
         WHERE aggregation_status = 'processing' AND updated_at <= datetime('now', ?1)",
        domain.raw_table()
    );
    let n = conn.execute(&sql, params![format!("-{older_than_secs} seconds")])?;
    Ok(n)
}
