use super::error::BatchError;
use crate::models::RawRecord;

/// Reject rows that cannot be aggregated. The error text is what ends up in
/// the row's `error_reason`.
pub fn validate_record(record: &RawRecord) -> Result<(), BatchError> {
    match record.missing_field() {
        Some(field) => Err(BatchError::Validation(format!("missing required field: {field}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationStatus, Domain};
    use chrono::NaiveDate;

    fn lab(name: Option<&str>, value: Option<f64>, dated: bool) -> RawRecord {
        RawRecord {
            id: 1,
            domain: Domain::Labs,
            user_id: 7,
            label: name.map(String::from),
            value,
            unit: Some("%".into()),
            observed_at: dated.then(|| {
                NaiveDate::from_ymd_opt(2024, 1, 10)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            }),
            reference_range: None,
            category_hint: None,
            status: AggregationStatus::Pending,
            error_reason: None,
            created_at: "2024-01-10 00:00:00".into(),
        }
    }

    #[test]
    fn complete_row_passes() {
        assert!(validate_record(&lab(Some("HbA1c"), Some(6.1), true)).is_ok());
    }

    #[test]
    fn reason_names_missing_field() {
        let err = validate_record(&lab(Some("HbA1c"), None, true)).unwrap_err();
        assert_eq!(err.to_string(), "missing required field: value");

        let err = validate_record(&lab(Some("  "), Some(6.1), true)).unwrap_err();
        assert_eq!(err.to_string(), "missing required field: test_name");

        let err = validate_record(&lab(Some("HbA1c"), Some(6.1), false)).unwrap_err();
        assert_eq!(err.to_string(), "missing required field: test_date");
    }

    #[test]
    fn non_finite_value_is_missing() {
        let err = validate_record(&lab(Some("HbA1c"), Some(f64::NAN), true)).unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));
    }
}
