use serde::{Deserialize, Serialize};

/// sum / avg / min / max / count over one metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: i64,
}

/// One row of an aggregate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub user_id: i64,
    pub period_key: String,
    pub metric: String,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub external_code: Option<String>,
    pub summary: MetricSummary,
}
