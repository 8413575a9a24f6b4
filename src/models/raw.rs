use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::enums::{AggregationStatus, Domain};

/// Timestamp format for vitals `occurred_at`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Date format for `meal_date` / `test_date` and daily period keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One raw measurement as pulled by the status store, regardless of domain.
///
/// Label, value and time are optional: rows are ingested as-is and
/// incomplete ones are only rejected at validation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    pub domain: Domain,
    pub user_id: i64,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    /// Date-only domains (nutrition, labs) are stored at midnight.
    pub observed_at: Option<NaiveDateTime>,
    /// Labs only.
    pub reference_range: Option<String>,
    /// Labs only: category suggested by the ingesting document.
    pub category_hint: Option<String>,
    pub status: AggregationStatus,
    pub error_reason: Option<String>,
    pub created_at: String,
}

impl RawRecord {
    pub fn observed_date(&self) -> Option<NaiveDate> {
        self.observed_at.map(|t| t.date())
    }

    /// Names the first required field this row is missing, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        match &self.label {
            None => return Some(self.domain.label_column()),
            Some(label) if label.trim().is_empty() => return Some(self.domain.label_column()),
            _ => {}
        }
        match self.value {
            None => return Some("value"),
            Some(v) if !v.is_finite() => return Some("value"),
            _ => {}
        }
        if self.observed_at.is_none() {
            return Some(self.domain.time_column());
        }
        None
    }
}

/// Parse the stored time column of a domain into a timestamp.
pub fn parse_observed(domain: Domain, raw: &str) -> Option<NaiveDateTime> {
    match domain {
        Domain::Vitals => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).ok(),
        Domain::Nutrition | Domain::Labs => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(domain: Domain) -> RawRecord {
        RawRecord {
            id: 1,
            domain,
            user_id: 42,
            label: Some("heart_rate".into()),
            value: Some(60.0),
            unit: Some("bpm".into()),
            observed_at: parse_observed(Domain::Vitals, "2024-03-04 09:15:00"),
            reference_range: None,
            category_hint: None,
            status: AggregationStatus::Pending,
            error_reason: None,
            created_at: "2024-03-04 09:15:01".into(),
        }
    }

    #[test]
    fn complete_record_has_no_missing_field() {
        assert_eq!(record(Domain::Vitals).missing_field(), None);
    }

    #[test]
    fn blank_label_is_missing() {
        let mut r = record(Domain::Labs);
        r.label = Some("   ".into());
        assert_eq!(r.missing_field(), Some("test_name"));
    }

    #[test]
    fn nan_value_is_missing() {
        let mut r = record(Domain::Vitals);
        r.value = Some(f64::NAN);
        assert_eq!(r.missing_field(), Some("value"));
    }

    #[test]
    fn missing_date_names_domain_column() {
        let mut r = record(Domain::Nutrition);
        r.observed_at = None;
        assert_eq!(r.missing_field(), Some("meal_date"));
    }

    #[test]
    fn date_only_domains_parse_to_midnight() {
        let t = parse_observed(Domain::Labs, "2024-02-29").unwrap();
        assert_eq!(t.format(DATETIME_FORMAT).to_string(), "2024-02-29 00:00:00");
        assert!(parse_observed(Domain::Labs, "29/02/2024").is_none());
        assert!(parse_observed(Domain::Vitals, "2024-02-29").is_none());
    }
}
