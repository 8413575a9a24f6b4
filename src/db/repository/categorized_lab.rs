use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::{AggregationStatus, CategorizedLab, DATE_FORMAT};

/// Insert the categorized copy of a raw lab. A replayed raw row replaces its
/// previous copy instead of duplicating it.
pub fn upsert_categorized_lab(conn: &Connection, lab: &CategorizedLab) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO categorized_labs (id, raw_lab_id, user_id, test_name, display_name, value,
         unit, test_date, internal_code, external_code, category, aggregation_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (raw_lab_id) DO UPDATE SET
            id = excluded.id,
            test_name = excluded.test_name,
            display_name = excluded.display_name,
            value = excluded.value,
            unit = excluded.unit,
            test_date = excluded.test_date,
            internal_code = excluded.internal_code,
            external_code = excluded.external_code,
            category = excluded.category,
            aggregation_status = excluded.aggregation_status,
            updated_at = datetime('now')",
        params![
            lab.id,
            lab.raw_lab_id,
            lab.user_id,
            lab.test_name,
            lab.display_name,
            lab.value,
            lab.unit,
            lab.test_date.format(DATE_FORMAT).to_string(),
            lab.internal_code,
            lab.external_code,
            lab.category,
            lab.status.as_str(),
        ],
    )?;
    Ok(())
}

pub fn mark_categorized_completed(conn: &Connection, raw_lab_ids: &[i64]) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "UPDATE categorized_labs SET aggregation_status = 'completed', updated_at = datetime('now')
         WHERE raw_lab_id = ?1 AND aggregation_status = 'processing'",
    )?;
    let mut n = 0;
    for id in raw_lab_ids {
        n += stmt.execute(params![id])?;
    }
    Ok(n)
}

pub fn get_categorized_lab(conn: &Connection, raw_lab_id: i64) -> Result<Option<CategorizedLab>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, raw_lab_id, user_id, test_name, display_name, value, unit, test_date,
             internal_code, external_code, category, aggregation_status
             FROM categorized_labs WHERE raw_lab_id = ?1",
            params![raw_lab_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                ))
            },
        )
        .optional()?;

    let Some((id, raw_lab_id, user_id, test_name, display_name, value, unit, test_date, internal_code, external_code, category, status)) = row else {
        return Ok(None);
    };
    let test_date = NaiveDate::parse_from_str(&test_date, DATE_FORMAT).map_err(|_| {
        DatabaseError::ConstraintViolation(format!("categorized lab {id} has bad test_date {test_date}"))
    })?;
    Ok(Some(CategorizedLab {
        id,
        raw_lab_id,
        user_id,
        test_name,
        display_name,
        value,
        unit,
        test_date,
        internal_code,
        external_code,
        category,
        status: status.parse::<AggregationStatus>()?,
    }))
}

/// A categorized lab value as read by the rollup engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedPoint {
    pub internal_code: String,
    pub external_code: String,
    pub category: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// Completed categorized labs of a user with `from <= test_date < to`.
pub fn get_categorized_in_range(
    conn: &Connection,
    user_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CategorizedPoint>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT internal_code, external_code, category, value, unit
         FROM categorized_labs
         WHERE user_id = ?1 AND test_date >= ?2 AND test_date < ?3
           AND aggregation_status = 'completed'
         ORDER BY test_date ASC, raw_lab_id ASC",
    )?;
    let rows = stmt.query_map(
        params![
            user_id,
            from.format(DATE_FORMAT).to_string(),
            to.format(DATE_FORMAT).to_string(),
        ],
        |row| {
            Ok(CategorizedPoint {
                internal_code: row.get(0)?,
                external_code: row.get(1)?,
                category: row.get(2)?,
                value: row.get(3)?,
                unit: row.get(4)?,
            })
        },
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_raw_lab;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewLabResult;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn categorized(raw_lab_id: i64, external_code: &str) -> CategorizedLab {
        CategorizedLab {
            id: CategorizedLab::make_id(9, external_code, raw_lab_id),
            raw_lab_id,
            user_id: 9,
            test_name: "hba1c".into(),
            display_name: "Hemoglobin A1c".into(),
            value: 6.1,
            unit: Some("%".into()),
            test_date: day("2024-01-10"),
            internal_code: "LAB-ABC".into(),
            external_code: external_code.into(),
            category: "Diabetes".into(),
            status: AggregationStatus::Processing,
        }
    }

    #[test]
    fn replay_replaces_previous_copy() {
        let conn = open_memory_database().unwrap();
        let raw = insert_raw_lab(&conn, &NewLabResult::new(9, "hba1c", 6.1, "%", day("2024-01-10"))).unwrap();

        upsert_categorized_lab(&conn, &categorized(raw, "UNKNOWN")).unwrap();
        upsert_categorized_lab(&conn, &categorized(raw, "4548-4")).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM categorized_labs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let stored = get_categorized_lab(&conn, raw).unwrap().unwrap();
        assert_eq!(stored.id, format!("9:4548-4:{raw}"));
        assert_eq!(stored.external_code, "4548-4");
    }

    #[test]
    fn completion_and_range_query() {
        let conn = open_memory_database().unwrap();
        let raw = insert_raw_lab(&conn, &NewLabResult::new(9, "hba1c", 6.1, "%", day("2024-01-10"))).unwrap();
        upsert_categorized_lab(&conn, &categorized(raw, "4548-4")).unwrap();

        assert_eq!(mark_categorized_completed(&conn, &[raw]).unwrap(), 1);
        assert_eq!(
            get_categorized_lab(&conn, raw).unwrap().unwrap().status,
            AggregationStatus::Completed
        );

        let points = get_categorized_in_range(&conn, 9, day("2024-01-10"), day("2024-01-11")).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].category, "Diabetes");
        assert!(get_categorized_in_range(&conn, 9, day("2024-01-11"), day("2024-01-12"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn range_query_skips_rows_still_processing() {
        let conn = open_memory_database().unwrap();
        let raw = insert_raw_lab(&conn, &NewLabResult::new(9, "hba1c", 6.1, "%", day("2024-01-10"))).unwrap();
        upsert_categorized_lab(&conn, &categorized(raw, "4548-4")).unwrap();

        assert!(get_categorized_in_range(&conn, 9, day("2024-01-10"), day("2024-01-11"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cascade_from_raw_lab() {
        let conn = open_memory_database().unwrap();
        let raw = insert_raw_lab(&conn, &NewLabResult::new(9, "hba1c", 6.1, "%", day("2024-01-10"))).unwrap();
        upsert_categorized_lab(&conn, &categorized(raw, "4548-4")).unwrap();
        conn.execute("DELETE FROM raw_labs WHERE id = ?1", params![raw]).unwrap();
        assert!(get_categorized_lab(&conn, raw).unwrap().is_none());
    }
}
