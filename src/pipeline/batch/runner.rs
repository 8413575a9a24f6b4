use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use super::error::BatchError;
use super::processor::BatchProcessor;
use super::store::SqliteStatusStore;
use super::traits::{PassRunner, StatusStore};
use super::types::PassResult;
use crate::config::PipelineSettings;
use crate::db::sqlite::open_database;
use crate::models::Domain;
use crate::pipeline::terminology::{
    EmbeddingSearch, LlmOracle, MappingCache, OllamaClient, OllamaEmbedder, SharedTerminologyIndex,
    TerminologyResolver,
};

/// Rows left in `processing` this long are put back in the queue at the
/// start of a pass.
const STALE_CLAIM_AGE: Duration = Duration::from_secs(60 * 60);

/// Runs passes against the configured SQLite file.
///
/// Each pass opens its own connection and builds its own HTTP clients, so a
/// pass can run on any blocking thread. The mapping cache and the
/// terminology index are shared across passes.
pub struct SqlitePassRunner {
    settings: PipelineSettings,
    cache: Arc<MappingCache>,
    index: Arc<SharedTerminologyIndex>,
    external_lookup: bool,
}

impl SqlitePassRunner {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            cache: Arc::new(MappingCache::new()),
            index: Arc::new(SharedTerminologyIndex::new()),
            external_lookup: true,
        }
    }

    /// Resolve labs with cache and fuzzy matching only; no search, no oracle.
    pub fn offline(mut self) -> Self {
        self.external_lookup = false;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<MappingCache> {
        &self.cache
    }

    /// Put failed rows of every domain back in the queue.
    pub fn requeue_failed(&self, user_id: Option<i64>) -> Result<usize, BatchError> {
        let conn = self.open()?;
        let mut total = 0;
        for domain in Domain::all() {
            total += SqliteStatusStore.requeue_failed(&conn, *domain, user_id)?;
        }
        Ok(total)
    }

    /// Put rows of every domain claimed longer than `older_than` ago back in
    /// the queue. A worker that died mid-group leaves such rows behind.
    pub fn requeue_stale_processing(&self, older_than: Duration) -> Result<usize, BatchError> {
        let conn = self.open()?;
        requeue_stale(&conn, older_than)
    }

    fn open(&self) -> Result<Connection, BatchError> {
        Ok(open_database(&self.settings.db_path)?)
    }

    fn build_resolver(&self, conn: &Connection) -> TerminologyResolver {
        let resolver = TerminologyResolver::new(self.cache.clone(), self.settings.resolver.clone());
        if !self.external_lookup {
            return resolver;
        }
        let oracle = &self.settings.oracle;

        let resolver = match self.index.get_or_load(conn) {
            Ok(entries) if entries.is_empty() => {
                tracing::debug!("Terminology index is empty, similarity search disabled");
                resolver
            }
            Ok(entries) => match OllamaClient::new(&oracle.ollama_host, oracle.timeout) {
                Ok(client) => resolver.with_search(Box::new(EmbeddingSearch::new(
                    OllamaEmbedder::new(client, &oracle.embedding_model),
                    entries,
                ))),
                Err(e) => {
                    tracing::warn!(error = %e, "Embedding client unavailable, similarity search disabled");
                    resolver
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Terminology index failed to load, similarity search disabled");
                resolver
            }
        };

        match OllamaClient::new(&oracle.ollama_host, oracle.timeout) {
            Ok(client) => resolver.with_oracle(Box::new(LlmOracle::new(client, &oracle.model))),
            Err(e) => {
                tracing::warn!(error = %e, "Oracle client unavailable, codes resolve to UNKNOWN");
                resolver
            }
        }
    }
}

impl PassRunner for SqlitePassRunner {
    fn run_pass(&self) -> Result<PassResult, BatchError> {
        let conn = self.open()?;

        let stale = SqliteStatusStore.stale_processing(&conn, STALE_CLAIM_AGE)?;
        if let Some(oldest) = stale.first() {
            tracing::warn!(
                count = stale.len(),
                oldest_domain = %oldest.domain,
                oldest_id = oldest.id,
                claimed_at = %oldest.claimed_at,
                "Rows stuck in processing"
            );
            requeue_stale(&conn, STALE_CLAIM_AGE)?;
        }

        let processor = BatchProcessor::new(
            Box::new(SqliteStatusStore),
            self.build_resolver(&conn),
            self.settings.processor.clone(),
        );
        processor.run_pass(&conn)
    }

    fn pending_count(&self) -> Result<i64, BatchError> {
        let conn = self.open()?;
        SqliteStatusStore.pending_count(&conn)
    }
}

fn requeue_stale(conn: &Connection, older_than: Duration) -> Result<usize, BatchError> {
    let mut total = 0;
    for domain in Domain::all() {
        total += SqliteStatusStore.requeue_stale_processing(conn, *domain, older_than)?;
    }
    Ok(total)
}
