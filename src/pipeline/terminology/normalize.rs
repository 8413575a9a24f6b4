use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// External codes: letters, digits and dashes, with at least one digit.
static EXTERNAL_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$").unwrap());

/// Words that carry no topical signal in test names.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "by", "for", "in", "of", "on", "or", "per", "the", "to", "with",
    "blood", "serum", "plasma", "level", "levels", "test", "total", "mass", "volume",
];

/// Lower-case, trim and collapse internal whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whitespace-cleaned label in its original case, for display.
pub fn display_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic internal code: `LAB-` + 12 upper-case hex chars of SHA-256.
pub fn internal_code(normalized_label: &str) -> String {
    let hash = Sha256::digest(normalized_label.as_bytes());
    let hex: String = hash.iter().take(6).map(|b| format!("{b:02X}")).collect();
    format!("LAB-{hex}")
}

pub fn is_valid_external_code(code: &str) -> bool {
    EXTERNAL_CODE.is_match(code) && code.chars().any(|c| c.is_ascii_digit())
}

/// Content words of a name, lower-cased, split on anything non-alphanumeric.
pub fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// A candidate is topically relevant when it shares a content word with the label.
pub fn is_topically_relevant(label: &str, candidate_name: &str) -> bool {
    let label_words = keywords(label);
    !label_words.is_empty() && !label_words.is_disjoint(&keywords(candidate_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_case_and_spacing() {
        assert_eq!(normalize_label("  Hemoglobin   A1c "), "hemoglobin a1c");
        assert_eq!(normalize_label("LDL\tCholesterol"), "ldl cholesterol");
        assert_eq!(normalize_label("   "), "");
        assert_eq!(display_label(" Hemoglobin   A1c"), "Hemoglobin A1c");
    }

    #[test]
    fn internal_code_is_stable_and_shaped() {
        let a = internal_code("hemoglobin a1c");
        let b = internal_code("hemoglobin a1c");
        assert_eq!(a, b);
        assert!(a.starts_with("LAB-"));
        assert_eq!(a.len(), 16);
        assert!(a[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a, internal_code("hemoglobin"));
    }

    #[test]
    fn external_code_validation() {
        assert!(is_valid_external_code("4548-4"));
        assert!(is_valid_external_code("LP16413-4"));
        assert!(!is_valid_external_code("NONE"));
        assert!(!is_valid_external_code("UNKNOWN"));
        assert!(!is_valid_external_code("4548 4"));
        assert!(!is_valid_external_code("4548-"));
        assert!(!is_valid_external_code("45/48"));
        assert!(!is_valid_external_code(""));
    }

    #[test]
    fn relevance_by_keyword_overlap() {
        assert!(is_topically_relevant(
            "hemoglobin a1c",
            "Hemoglobin A1c/Hemoglobin.total in Blood"
        ));
        assert!(!is_topically_relevant("ferritin", "Sodium [Moles/volume] in Serum"));
        // Stop words alone never count as overlap.
        assert!(!is_topically_relevant("total blood", "Total protein in Blood"));
    }
}
