use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::AggregationStatus;

/// A lab result as extracted from a document, before categorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLabResult {
    pub user_id: i64,
    pub test_name: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub test_date: Option<NaiveDate>,
    pub category_hint: Option<String>,
}

impl NewLabResult {
    pub fn new(user_id: i64, test_name: &str, value: f64, unit: &str, test_date: NaiveDate) -> Self {
        Self {
            user_id,
            test_name: Some(test_name.to_string()),
            value: Some(value),
            unit: Some(unit.to_string()),
            reference_range: None,
            test_date: Some(test_date),
            category_hint: None,
        }
    }
}

/// A raw lab row enriched with its resolved category and codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedLab {
    /// `{user_id}:{external_code}:{raw_lab_id}`
    pub id: String,
    pub raw_lab_id: i64,
    pub user_id: i64,
    pub test_name: String,
    pub display_name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub test_date: NaiveDate,
    pub internal_code: String,
    pub external_code: String,
    pub category: String,
    pub status: AggregationStatus,
}

impl CategorizedLab {
    pub fn make_id(user_id: i64, external_code: &str, raw_lab_id: i64) -> String {
        format!("{user_id}:{external_code}:{raw_lab_id}")
    }
}
