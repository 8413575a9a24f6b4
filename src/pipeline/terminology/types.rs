use serde::{Deserialize, Serialize};

use super::TerminologyError;
use crate::models::CodeSource;

/// Extra context carried by a raw lab row, used to sharpen search queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelContext {
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    /// Category suggested by the ingesting domain.
    pub category_hint: Option<String>,
}

/// One hit from the terminology similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub code: String,
    pub name: String,
    pub score: f32,
}

/// What the disambiguation oracle decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleVerdict {
    Code { code: String, source: CodeSource },
    NoMatch,
}

/// Embedding model abstraction
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, TerminologyError>;
}

/// Read-only similarity search over the external terminology.
pub trait TerminologySearch: Send + Sync {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchCandidate>, TerminologyError>;
}

/// Picks one external code for a label, from `candidates` when any are given,
/// otherwise from its own knowledge.
pub trait DisambiguationOracle: Send + Sync {
    fn disambiguate(
        &self,
        label: &str,
        context: &LabelContext,
        candidates: &[SearchCandidate],
    ) -> Result<OracleVerdict, TerminologyError>;
}
