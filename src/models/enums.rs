use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(AggregationStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Insufficient => "insufficient",
});

impl AggregationStatus {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `failed -> pending` is only legal through an explicit requeue, never
    /// as part of a processing pass.
    pub fn can_transition_to(self, next: AggregationStatus) -> bool {
        use AggregationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Insufficient)
                | (Processing, Completed)
                | (Processing, Failed)
                // Stale claim recovery.
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AggregationStatus::Completed | AggregationStatus::Failed | AggregationStatus::Insufficient
        )
    }
}

str_enum!(Domain {
    Vitals => "vitals",
    Nutrition => "nutrition",
    Labs => "labs",
});

impl Domain {
    pub fn all() -> &'static [Domain] {
        &[Domain::Vitals, Domain::Nutrition, Domain::Labs]
    }

    /// Raw source table for this domain.
    pub fn raw_table(self) -> &'static str {
        match self {
            Domain::Vitals => "raw_vitals",
            Domain::Nutrition => "raw_nutrition",
            Domain::Labs => "raw_labs",
        }
    }

    /// Column holding the free-text label (metric / nutrient / test name).
    pub fn label_column(self) -> &'static str {
        match self {
            Domain::Vitals => "metric",
            Domain::Nutrition => "nutrient",
            Domain::Labs => "test_name",
        }
    }

    /// Column holding the observation time or date.
    pub fn time_column(self) -> &'static str {
        match self {
            Domain::Vitals => "occurred_at",
            Domain::Nutrition => "meal_date",
            Domain::Labs => "test_date",
        }
    }

    /// Granularities recomputed for one (user, date) group, finest first.
    /// Order matters: each level reads the level before it.
    pub fn ladder(self) -> &'static [Granularity] {
        match self {
            Domain::Vitals => &[
                Granularity::Hourly,
                Granularity::Daily,
                Granularity::Weekly,
                Granularity::Monthly,
            ],
            Domain::Nutrition => &[Granularity::Daily, Granularity::Weekly, Granularity::Monthly],
            Domain::Labs => &[
                Granularity::Daily,
                Granularity::Weekly,
                Granularity::Monthly,
                Granularity::Quarterly,
                Granularity::Yearly,
            ],
        }
    }

    /// Aggregate table for a granularity, `None` when the domain does not roll up at that level.
    pub fn aggregate_table(self, granularity: Granularity) -> Option<&'static str> {
        use Domain::*;
        use Granularity::*;
        match (self, granularity) {
            (Vitals, Hourly) => Some("vitals_hourly"),
            (Vitals, Daily) => Some("vitals_daily"),
            (Vitals, Weekly) => Some("vitals_weekly"),
            (Vitals, Monthly) => Some("vitals_monthly"),
            (Nutrition, Daily) => Some("nutrition_daily"),
            (Nutrition, Weekly) => Some("nutrition_weekly"),
            (Nutrition, Monthly) => Some("nutrition_monthly"),
            (Labs, Daily) => Some("labs_daily"),
            (Labs, Weekly) => Some("labs_weekly"),
            (Labs, Monthly) => Some("labs_monthly"),
            (Labs, Quarterly) => Some("labs_quarterly"),
            (Labs, Yearly) => Some("labs_yearly"),
            _ => None,
        }
    }
}

str_enum!(Granularity {
    Hourly => "hourly",
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
    Quarterly => "quarterly",
    Yearly => "yearly",
});

str_enum!(CodeSource {
    VectorSearch => "vector_search",
    LlmKnowledge => "llm_knowledge",
    Unknown => "unknown",
});
