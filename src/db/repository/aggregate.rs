use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;
use crate::models::{AggregateRecord, MetricSummary};

// Table names come from `Domain::aggregate_table`, a closed set, and are the
// only values formatted into SQL here.

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateRecord> {
    Ok(AggregateRecord {
        user_id: row.get(0)?,
        period_key: row.get(1)?,
        metric: row.get(2)?,
        unit: row.get(3)?,
        category: row.get(4)?,
        external_code: row.get(5)?,
        summary: MetricSummary {
            sum: row.get(6)?,
            avg: row.get(7)?,
            min: row.get(8)?,
            max: row.get(9)?,
            count: row.get(10)?,
        },
    })
}

/// Drop every row of a user whose period key falls in `[from_key, to_key]`.
pub fn delete_aggregates(
    conn: &Connection,
    table: &str,
    user_id: i64,
    from_key: &str,
    to_key: &str,
) -> Result<usize, DatabaseError> {
    let sql = format!("DELETE FROM {table} WHERE user_id = ?1 AND period_key >= ?2 AND period_key <= ?3");
    let n = conn.execute(&sql, params![user_id, from_key, to_key])?;
    Ok(n)
}

pub fn upsert_aggregate(conn: &Connection, table: &str, record: &AggregateRecord) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO {table} (user_id, period_key, metric, unit, category, external_code,
         value_sum, value_avg, value_min, value_max, sample_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT (user_id, period_key, metric) DO UPDATE SET
            unit = excluded.unit,
            category = excluded.category,
            external_code = excluded.external_code,
            value_sum = excluded.value_sum,
            value_avg = excluded.value_avg,
            value_min = excluded.value_min,
            value_max = excluded.value_max,
            sample_count = excluded.sample_count,
            updated_at = datetime('now')"
    );
    conn.execute(
        &sql,
        params![
            record.user_id,
            record.period_key,
            record.metric,
            record.unit,
            record.category,
            record.external_code,
            record.summary.sum,
            record.summary.avg,
            record.summary.min,
            record.summary.max,
            record.summary.count,
        ],
    )?;
    Ok(())
}

/// Rows of a user with `from_key <= period_key <= to_key`, ordered by period then metric.
pub fn get_aggregates_in_range(
    conn: &Connection,
    table: &str,
    user_id: i64,
    from_key: &str,
    to_key: &str,
) -> Result<Vec<AggregateRecord>, DatabaseError> {
    let sql = format!(
        "SELECT user_id, period_key, metric, unit, category, external_code,
                value_sum, value_avg, value_min, value_max, sample_count
         FROM {table}
         WHERE user_id = ?1 AND period_key >= ?2 AND period_key <= ?3
         ORDER BY period_key ASC, metric ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, from_key, to_key], aggregate_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn get_aggregate(
    conn: &Connection,
    table: &str,
    user_id: i64,
    period_key: &str,
    metric: &str,
) -> Result<Option<AggregateRecord>, DatabaseError> {
    let sql = format!(
        "SELECT user_id, period_key, metric, unit, category, external_code,
                value_sum, value_avg, value_min, value_max, sample_count
         FROM {table}
         WHERE user_id = ?1 AND period_key = ?2 AND metric = ?3"
    );
    let row = conn
        .query_row(&sql, params![user_id, period_key, metric], aggregate_from_row)
        .optional()?;
    Ok(row)
}
