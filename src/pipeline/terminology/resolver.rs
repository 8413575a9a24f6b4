use std::sync::Arc;

use rusqlite::Connection;

use super::cache::MappingCache;
use super::fuzzy::best_match;
use super::normalize::{display_label, internal_code, is_topically_relevant, is_valid_external_code, normalize_label};
use super::types::{DisambiguationOracle, LabelContext, OracleVerdict, TerminologySearch};
use super::TerminologyError;
use crate::config::ResolverConfig;
use crate::db::repository::{get_mapping, insert_mapping, update_external_code, update_suggested_category};
use crate::models::{CodeSource, Resolution, TerminologyMapping, FALLBACK_CATEGORY, UNKNOWN_EXTERNAL_CODE};

/// Maps free-text lab names to a category plus internal and external codes.
///
/// Tiers, first success wins: cached mapping, fuzzy match against standard
/// names, similarity search plus oracle for the external code, and finally
/// `Others` / `UNKNOWN`. Every new mapping is persisted before `resolve`
/// returns. Search and oracle failures degrade to `UNKNOWN`, never to an error.
pub struct TerminologyResolver {
    cache: Arc<MappingCache>,
    search: Option<Box<dyn TerminologySearch>>,
    oracle: Option<Box<dyn DisambiguationOracle>>,
    config: ResolverConfig,
}

impl TerminologyResolver {
    pub fn new(cache: Arc<MappingCache>, config: ResolverConfig) -> Self {
        Self {
            cache,
            search: None,
            oracle: None,
            config,
        }
    }

    pub fn with_search(mut self, search: Box<dyn TerminologySearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_oracle(mut self, oracle: Box<dyn DisambiguationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn resolve(
        &self,
        conn: &Connection,
        label: &str,
        context: &LabelContext,
    ) -> Result<Resolution, TerminologyError> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return Err(TerminologyError::EmptyLabel);
        }
        self.cache.ensure_warm(conn)?;

        if let Some(existing) = self.lookup(conn, &normalized)? {
            return self.resolve_known(conn, existing, label, context);
        }

        let learned = self.cache.standardized_names();
        let fuzzy = best_match(&normalized, &learned, self.config.fuzzy_threshold);
        let hint = clean_hint(context);

        let (category, display_name) = match &fuzzy {
            Some(m) => {
                tracing::debug!(label = %normalized, category = %m.category, score = m.score, "Fuzzy match");
                (m.category.clone(), m.standard_name.clone())
            }
            // A hint alone never names a category; it is kept as a suggestion.
            None => (FALLBACK_CATEGORY.to_string(), display_label(label)),
        };

        let external = self.resolve_external(label, &normalized, context);
        let (external_code, source) = match external {
            Some((code, source)) => (code, source),
            None => (UNKNOWN_EXTERNAL_CODE.to_string(), CodeSource::Unknown),
        };

        let mapping = TerminologyMapping {
            label: normalized.clone(),
            display_name,
            internal_code: internal_code(&normalized),
            is_standardized: external_code != UNKNOWN_EXTERNAL_CODE,
            external_code,
            external_code_source: source,
            suggested_category: hint.filter(|h| *h != category),
            category,
        };

        if insert_mapping(conn, &mapping)? {
            tracing::info!(
                label = %mapping.label,
                category = %mapping.category,
                external_code = %mapping.external_code,
                "New terminology mapping"
            );
            self.cache.insert(mapping.clone());
            return Ok(mapping.resolution());
        }

        // Another worker stored this label first; its mapping wins.
        match get_mapping(conn, &normalized)? {
            Some(stored) => {
                self.cache.insert(stored.clone());
                Ok(stored.resolution())
            }
            None => Err(TerminologyError::Database(crate::db::DatabaseError::NotFound {
                entity_type: "terminology_mapping".into(),
                id: normalized,
            })),
        }
    }

    fn lookup(&self, conn: &Connection, normalized: &str) -> Result<Option<TerminologyMapping>, TerminologyError> {
        if let Some(mapping) = self.cache.get(normalized) {
            return Ok(Some(mapping));
        }
        let stored = get_mapping(conn, normalized)?;
        if let Some(mapping) = &stored {
            self.cache.insert(mapping.clone());
        }
        Ok(stored)
    }

    /// Cache hit: reconcile the suggested category, optionally retry an
    /// unresolved external code. The display name is never changed.
    fn resolve_known(
        &self,
        conn: &Connection,
        mut mapping: TerminologyMapping,
        label: &str,
        context: &LabelContext,
    ) -> Result<Resolution, TerminologyError> {
        let mut changed = false;

        if let Some(hint) = clean_hint(context) {
            if hint != mapping.category && mapping.suggested_category.as_deref() != Some(hint.as_str()) {
                update_suggested_category(conn, &mapping.label, &hint)?;
                mapping.suggested_category = Some(hint);
                changed = true;
            }
        }

        if !mapping.has_external_code() && self.config.retry_unresolved_codes {
            if let Some((code, source)) = self.resolve_external(label, &mapping.label, context) {
                update_external_code(conn, &mapping.label, &code, source)?;
                mapping.external_code = code;
                mapping.external_code_source = source;
                mapping.is_standardized = true;
                changed = true;
            }
        }

        if changed {
            self.cache.insert(mapping.clone());
        }
        Ok(mapping.resolution())
    }

    /// Similarity search, relevance filter, then the oracle. `None` on any
    /// miss or failure.
    fn resolve_external(
        &self,
        label: &str,
        normalized: &str,
        context: &LabelContext,
    ) -> Option<(String, CodeSource)> {
        let candidates = match &self.search {
            Some(search) => {
                let query = search_query(label, context);
                match search.search(&query, self.config.search_top_k) {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(label = %normalized, error = %e, "Terminology search failed");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };
        let relevant: Vec<_> = candidates
            .into_iter()
            .filter(|c| is_topically_relevant(normalized, &c.name))
            .collect();

        let oracle = self.oracle.as_ref()?;
        match oracle.disambiguate(label, context, &relevant) {
            Ok(OracleVerdict::Code { code, source }) if is_valid_external_code(&code) => {
                tracing::debug!(label = %normalized, code = %code, source = %source, "External code resolved");
                Some((code, source))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(label = %normalized, error = %e, "Disambiguation oracle failed");
                None
            }
        }
    }
}

fn clean_hint(context: &LabelContext) -> Option<String> {
    context
        .category_hint
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Label plus unit and reference range, space-separated.
fn search_query(label: &str, context: &LabelContext) -> String {
    let mut parts = vec![display_label(label)];
    parts.extend(context.unit.iter().cloned());
    parts.extend(context.reference_range.iter().cloned());
    parts.join(" ")
}
