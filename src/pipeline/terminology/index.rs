use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;

use super::types::{EmbeddingModel, SearchCandidate, TerminologySearch};
use super::TerminologyError;
use crate::db::repository::{load_index_entries, IndexEntry};

/// Load-once handle over the precomputed terminology index.
///
/// The index is built by a separate process and never changes while the
/// worker runs, so the first successful load is kept for the process lifetime.
#[derive(Default)]
pub struct SharedTerminologyIndex {
    entries: Mutex<Option<Arc<Vec<IndexEntry>>>>,
}

impl SharedTerminologyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loaded index, for tests and embedding into other tools.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries: Mutex::new(Some(Arc::new(entries))),
        }
    }

    pub fn get_or_load(&self, conn: &Connection) -> Result<Arc<Vec<IndexEntry>>, TerminologyError> {
        let mut slot = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = slot.as_ref() {
            return Ok(entries.clone());
        }
        let loaded = Arc::new(load_index_entries(conn)?);
        tracing::info!(entries = loaded.len(), "Terminology index loaded");
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Cosine-similarity search over index entries.
pub struct EmbeddingSearch<E: EmbeddingModel> {
    embedder: E,
    entries: Arc<Vec<IndexEntry>>,
}

impl<E: EmbeddingModel> EmbeddingSearch<E> {
    pub fn new(embedder: E, entries: Arc<Vec<IndexEntry>>) -> Self {
        Self { embedder, entries }
    }
}

impl<E: EmbeddingModel> TerminologySearch for EmbeddingSearch<E> {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchCandidate>, TerminologyError> {
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query)?;

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query_embedding, &entry.embedding), entry))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| SearchCandidate {
                code: entry.code.clone(),
                name: entry.name.clone(),
                score,
            })
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
