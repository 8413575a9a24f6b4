use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One nutrient amount from a logged meal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNutritionEntry {
    pub user_id: i64,
    pub nutrient: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub meal_date: Option<NaiveDate>,
    /// breakfast / lunch / dinner / snack; informational only.
    pub meal_type: Option<String>,
}

impl NewNutritionEntry {
    pub fn new(user_id: i64, nutrient: &str, value: f64, unit: &str, meal_date: NaiveDate) -> Self {
        Self {
            user_id,
            nutrient: Some(nutrient.to_string()),
            value: Some(value),
            unit: Some(unit.to_string()),
            meal_date: Some(meal_date),
            meal_type: None,
        }
    }
}
