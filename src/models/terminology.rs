use serde::{Deserialize, Serialize};

use super::enums::CodeSource;

/// Sentinel for "no external code resolved". Stored explicitly so joins on
/// the code column never drop a record.
pub const UNKNOWN_EXTERNAL_CODE: &str = "UNKNOWN";

/// Category assigned when nothing matched.
pub const FALLBACK_CATEGORY: &str = "Others";

/// Learned association between a normalized free-text label and its codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminologyMapping {
    /// Normalized label (lower-case, single-spaced). Unique.
    pub label: String,
    /// Canonical display name. Set once at creation, never overwritten.
    pub display_name: String,
    pub internal_code: String,
    pub external_code: String,
    pub external_code_source: CodeSource,
    pub category: String,
    /// Latest category suggested by an ingesting domain, when it differs.
    pub suggested_category: Option<String>,
    /// True once a validated external code backs this mapping.
    pub is_standardized: bool,
}

impl TerminologyMapping {
    pub fn has_external_code(&self) -> bool {
        self.external_code != UNKNOWN_EXTERNAL_CODE
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            category: self.category.clone(),
            display_name: self.display_name.clone(),
            internal_code: self.internal_code.clone(),
            external_code: self.external_code.clone(),
            source: self.external_code_source,
        }
    }
}

/// What the resolver hands back for one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub category: String,
    pub display_name: String,
    pub internal_code: String,
    pub external_code: String,
    pub source: CodeSource,
}
