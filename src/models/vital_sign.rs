use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Well-known vital metric names. Raw rows may carry any label; these are the
/// ones the rollup engine derives extra fields from.
pub const METRIC_WEIGHT: &str = "weight";
pub const METRIC_HEIGHT: &str = "height";
pub const METRIC_BMI: &str = "bmi";

/// A vital sign measurement as submitted by a client device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVitalSign {
    pub user_id: i64,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub occurred_at: Option<NaiveDateTime>,
}

impl NewVitalSign {
    pub fn new(user_id: i64, metric: &str, value: f64, unit: &str, occurred_at: NaiveDateTime) -> Self {
        Self {
            user_id,
            metric: Some(metric.to_string()),
            value: Some(value),
            unit: Some(unit.to_string()),
            occurred_at: Some(occurred_at),
        }
    }
}
