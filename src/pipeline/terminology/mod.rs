pub mod types;
pub mod normalize;
pub mod fuzzy;
pub mod cache;
pub mod index;
pub mod ollama;
pub mod oracle;
pub mod resolver;

pub use types::*;
pub use normalize::*;
pub use fuzzy::*;
pub use cache::*;
pub use index::*;
pub use ollama::*;
pub use oracle::*;
pub use resolver::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum TerminologyError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Similarity search error: {0}")]
    Search(String),

    #[error("Malformed oracle response: {0}")]
    MalformedOracleResponse(String),

    #[error("Label is empty after normalization")]
    EmptyLabel,
}
