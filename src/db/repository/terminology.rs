use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::DatabaseError;
use crate::models::{CodeSource, TerminologyMapping};

const MAPPING_COLUMNS: &str = "label, display_name, internal_code, external_code,
    external_code_source, category, suggested_category, is_standardized";

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<(TerminologyMapping, String)> {
    let source: String = row.get(4)?;
    Ok((
        TerminologyMapping {
            label: row.get(0)?,
            display_name: row.get(1)?,
            internal_code: row.get(2)?,
            external_code: row.get(3)?,
            external_code_source: CodeSource::Unknown,
            category: row.get(5)?,
            suggested_category: row.get(6)?,
            is_standardized: row.get::<_, i64>(7)? != 0,
        },
        source,
    ))
}

fn finish(pair: (TerminologyMapping, String)) -> Result<TerminologyMapping, DatabaseError> {
    let (mut mapping, source) = pair;
    mapping.external_code_source = source.parse()?;
    Ok(mapping)
}

/// Exact lookup on the normalized label.
pub fn get_mapping(conn: &Connection, label: &str) -> Result<Option<TerminologyMapping>, DatabaseError> {
    let sql = format!("SELECT {MAPPING_COLUMNS} FROM terminology_mapping WHERE label = ?1");
    let row = conn.query_row(&sql, params![label], mapping_from_row).optional()?;
    row.map(finish).transpose()
}

pub fn list_mappings(conn: &Connection) -> Result<Vec<TerminologyMapping>, DatabaseError> {
    let sql = format!("SELECT {MAPPING_COLUMNS} FROM terminology_mapping ORDER BY label");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], mapping_from_row)?;
    let mut mappings = Vec::new();
    for row in rows {
        mappings.push(finish(row?)?);
    }
    Ok(mappings)
}

pub fn count_mappings(conn: &Connection) -> Result<i64, DatabaseError> {
    let n = conn.query_row("SELECT COUNT(*) FROM terminology_mapping", [], |row| row.get(0))?;
    Ok(n)
}

/// Insert a new mapping. Returns false when the label already exists, in
/// which case the stored mapping is left untouched.
pub fn insert_mapping(conn: &Connection, mapping: &TerminologyMapping) -> Result<bool, DatabaseError> {
    let n = conn.execute(
        "INSERT INTO terminology_mapping (label, display_name, internal_code, external_code,
         external_code_source, category, suggested_category, is_standardized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (label) DO NOTHING",
        params![
            mapping.label,
            mapping.display_name,
            mapping.internal_code,
            mapping.external_code,
            mapping.external_code_source.as_str(),
            mapping.category,
            mapping.suggested_category,
            mapping.is_standardized as i64,
        ],
    )?;
    Ok(n == 1)
}

pub fn update_suggested_category(
    conn: &Connection,
    label: &str,
    suggested_category: &str,
) -> Result<(), DatabaseError> {
    let n = conn.execute(
        "UPDATE terminology_mapping SET suggested_category = ?1, updated_at = datetime('now')
         WHERE label = ?2",
        params![suggested_category, label],
    )?;
    if n == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "terminology_mapping".into(),
            id: label.into(),
        });
    }
    Ok(())
}

/// Record a resolved external code. The display name is never touched here.
pub fn update_external_code(
    conn: &Connection,
    label: &str,
    external_code: &str,
    source: CodeSource,
) -> Result<(), DatabaseError> {
    let n = conn.execute(
        "UPDATE terminology_mapping
         SET external_code = ?1, external_code_source = ?2, is_standardized = 1,
             updated_at = datetime('now')
         WHERE label = ?3",
        params![external_code, source.as_str(), label],
    )?;
    if n == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "terminology_mapping".into(),
            id: label.into(),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Terminology index (precomputed, read-only for the pipeline)
// ═══════════════════════════════════════════

/// One entry of the external terminology with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub code: String,
    pub name: String,
    pub embedding: Vec<f32>,
}

/// Embeddings are stored as little-endian f32.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Load every index entry. Rows with a malformed embedding are skipped.
pub fn load_index_entries(conn: &Connection) -> Result<Vec<IndexEntry>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT code, name, embedding FROM terminology_index ORDER BY code")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (code, name, blob) = row?;
        match decode_embedding(&blob) {
            Some(embedding) => entries.push(IndexEntry { code, name, embedding }),
            None => tracing::warn!(code = %code, "Skipping index entry with malformed embedding"),
        }
    }
    Ok(entries)
}

pub fn insert_index_entry(conn: &Connection, entry: &IndexEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO terminology_index (code, name, embedding) VALUES (?1, ?2, ?3)",
        params![entry.code, entry.name, encode_embedding(&entry.embedding)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn mapping(label: &str) -> TerminologyMapping {
        TerminologyMapping {
            label: label.into(),
            display_name: "Hemoglobin A1c".into(),
            internal_code: "LAB-0123456789AB".into(),
            external_code: "UNKNOWN".into(),
            external_code_source: CodeSource::Unknown,
            category: "Diabetes".into(),
            suggested_category: None,
            is_standardized: false,
        }
    }

    #[test]
    fn insert_is_first_writer_wins() {
        let conn = open_memory_database().unwrap();
        assert!(insert_mapping(&conn, &mapping("hba1c")).unwrap());

        let mut other = mapping("hba1c");
        other.display_name = "HbA1c (renamed)".into();
        assert!(!insert_mapping(&conn, &other).unwrap());

        let stored = get_mapping(&conn, "hba1c").unwrap().unwrap();
        assert_eq!(stored.display_name, "Hemoglobin A1c");
        assert_eq!(count_mappings(&conn).unwrap(), 1);
    }

    #[test]
    fn external_code_update_marks_standardized() {
        let conn = open_memory_database().unwrap();
        insert_mapping(&conn, &mapping("hba1c")).unwrap();
        update_external_code(&conn, "hba1c", "4548-4", CodeSource::VectorSearch).unwrap();

        let stored = get_mapping(&conn, "hba1c").unwrap().unwrap();
        assert_eq!(stored.external_code, "4548-4");
        assert_eq!(stored.external_code_source, CodeSource::VectorSearch);
        assert!(stored.is_standardized);
        assert_eq!(stored.display_name, "Hemoglobin A1c");
    }

    #[test]
    fn updates_on_missing_label_are_not_found() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            update_suggested_category(&conn, "nope", "Lipids"),
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(get_mapping(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn suggested_category_is_stored() {
        let conn = open_memory_database().unwrap();
        insert_mapping(&conn, &mapping("hba1c")).unwrap();
        update_suggested_category(&conn, "hba1c", "Endocrine").unwrap();
        let all = list_mappings(&conn).unwrap();
        assert_eq!(all[0].suggested_category.as_deref(), Some("Endocrine"));
    }

    #[test]
    fn index_entries_load_and_skip_malformed() {
        let conn = open_memory_database().unwrap();
        insert_index_entry(
            &conn,
            &IndexEntry {
                code: "4548-4".into(),
                name: "Hemoglobin A1c/Hemoglobin.total in Blood".into(),
                embedding: vec![0.5, -1.0, 2.25],
            },
        )
        .unwrap();
        conn.execute(
            "INSERT INTO terminology_index (code, name, embedding) VALUES ('BAD-1', 'bad', x'010203')",
            [],
        )
        .unwrap();

        let entries = load_index_entries(&conn).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].embedding, vec![0.5, -1.0, 2.25]);
    }
}
