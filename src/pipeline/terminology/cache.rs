use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use rusqlite::Connection;

use super::TerminologyError;
use crate::db::repository::list_mappings;
use crate::models::TerminologyMapping;

/// Process-wide cache of terminology mappings, keyed by normalized label.
///
/// Warmed from the database once, on first use; concurrent first users wait
/// on the same load instead of each reading the table. After warm-up the
/// cache is read-mostly and is kept in step with every mapping the resolver
/// writes.
#[derive(Default)]
pub struct MappingCache {
    entries: RwLock<HashMap<String, TerminologyMapping>>,
    warmed: Mutex<bool>,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all stored mappings unless that already happened.
    pub fn ensure_warm(&self, conn: &Connection) -> Result<(), TerminologyError> {
        let mut warmed = self.warmed.lock().unwrap_or_else(PoisonError::into_inner);
        if *warmed {
            return Ok(());
        }
        let mappings = list_mappings(conn)?;
        let count = mappings.len();
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for mapping in mappings {
                entries.entry(mapping.label.clone()).or_insert(mapping);
            }
        }
        *warmed = true;
        tracing::debug!(count, "Terminology cache warmed");
        Ok(())
    }

    pub fn is_warm(&self) -> bool {
        *self.warmed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, normalized_label: &str) -> Option<TerminologyMapping> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(normalized_label)
            .cloned()
    }

    pub fn insert(&self, mapping: TerminologyMapping) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mapping.label.clone(), mapping);
    }

    /// `(display_name, category)` of every standardized mapping, for fuzzy matching.
    pub fn standardized_names(&self) -> Vec<(String, String)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<(String, String)> = entries
            .values()
            .filter(|m| m.is_standardized)
            .map(|m| (m.display_name.clone(), m.category.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_mapping;
    use crate::db::sqlite::open_memory_database;
    use crate::models::CodeSource;

    fn mapping(label: &str, standardized: bool) -> TerminologyMapping {
        TerminologyMapping {
            label: label.into(),
            display_name: label.to_uppercase(),
            internal_code: "LAB-000000000000".into(),
            external_code: if standardized { "1234-5".into() } else { "UNKNOWN".into() },
            external_code_source: if standardized { CodeSource::VectorSearch } else { CodeSource::Unknown },
            category: "Lipids".into(),
            suggested_category: None,
            is_standardized: standardized,
        }
    }

    #[test]
    fn warm_up_loads_stored_mappings_once() {
        let conn = open_memory_database().unwrap();
        insert_mapping(&conn, &mapping("ldl", true)).unwrap();

        let cache = MappingCache::new();
        assert!(!cache.is_warm());
        cache.ensure_warm(&conn).unwrap();
        assert!(cache.is_warm());
        assert_eq!(cache.len(), 1);

        // Rows written behind the cache's back are not re-read.
        insert_mapping(&conn, &mapping("hdl", true)).unwrap();
        cache.ensure_warm(&conn).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("hdl").is_none());
    }

    #[test]
    fn standardized_names_skip_unresolved() {
        let cache = MappingCache::new();
        cache.insert(mapping("ldl", true));
        cache.insert(mapping("mystery", false));
        assert_eq!(
            cache.standardized_names(),
            vec![("LDL".to_string(), "Lipids".to_string())]
        );
    }

    #[test]
    fn concurrent_warm_up_is_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let conn = crate::db::sqlite::open_database(&path).unwrap();
            insert_mapping(&conn, &mapping("ldl", true)).unwrap();
        }
        let cache = std::sync::Arc::new(MappingCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = crate::db::sqlite::open_database(&path).unwrap();
                    cache.ensure_warm(&conn).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
