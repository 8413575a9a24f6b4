//! Fuzzy category matching against known standard test names.

/// Standard test names per category. Learned standardized mappings extend
/// this list at runtime.
pub const STANDARD_TESTS: &[(&str, &[&str])] = &[
    (
        "Diabetes",
        &[
            "Hemoglobin A1c",
            "HbA1c",
            "Glycated Hemoglobin",
            "Fasting Glucose",
            "Glucose",
            "Insulin",
            "C-Peptide",
        ],
    ),
    (
        "Lipids",
        &[
            "Total Cholesterol",
            "LDL Cholesterol",
            "HDL Cholesterol",
            "Non-HDL Cholesterol",
            "Triglycerides",
            "Lipoprotein(a)",
        ],
    ),
    (
        "Complete Blood Count",
        &[
            "Hemoglobin",
            "Hematocrit",
            "White Blood Cell Count",
            "Red Blood Cell Count",
            "Platelet Count",
            "Mean Corpuscular Volume",
        ],
    ),
    (
        "Kidney Function",
        &[
            "Creatinine",
            "Blood Urea Nitrogen",
            "eGFR",
            "Uric Acid",
            "Albumin Creatinine Ratio",
        ],
    ),
    (
        "Liver Function",
        &[
            "Alanine Aminotransferase",
            "Aspartate Aminotransferase",
            "Alkaline Phosphatase",
            "Total Bilirubin",
            "Albumin",
            "Gamma-Glutamyl Transferase",
        ],
    ),
    (
        "Thyroid",
        &["Thyroid Stimulating Hormone", "TSH", "Free T4", "Free T3"],
    ),
    (
        "Electrolytes",
        &["Sodium", "Potassium", "Chloride", "Bicarbonate", "Calcium", "Magnesium"],
    ),
    (
        "Vitamins & Minerals",
        &["Vitamin D", "Vitamin B12", "Folate", "Ferritin", "Iron"],
    ),
    (
        "Inflammation",
        &["C-Reactive Protein", "Erythrocyte Sedimentation Rate"],
    ),
];

/// A standard name the label resembled closely enough.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub category: String,
    pub standard_name: String,
    pub score: f64,
}

/// Similarity of two normalized labels in 0..=1.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b).max(strsim::normalized_levenshtein(a, b))
}

/// Best-scoring standard name at or above `threshold`.
///
/// `learned` holds `(display_name, category)` pairs of standardized mappings.
/// Ties keep the earliest candidate.
pub fn best_match(
    normalized_label: &str,
    learned: &[(String, String)],
    threshold: f64,
) -> Option<FuzzyMatch> {
    let builtin = STANDARD_TESTS
        .iter()
        .flat_map(|(category, names)| names.iter().map(move |n| (*n, *category)));
    let learned = learned.iter().map(|(n, c)| (n.as_str(), c.as_str()));

    let mut best: Option<FuzzyMatch> = None;
    for (name, category) in builtin.chain(learned) {
        let score = similarity(normalized_label, &name.to_lowercase());
        if score < threshold {
            continue;
        }
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(FuzzyMatch {
                category: category.to_string(),
                standard_name: name.to_string(),
                score,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_standard_name_wins() {
        let m = best_match("hemoglobin a1c", &[], 0.88).unwrap();
        assert_eq!(m.category, "Diabetes");
        assert_eq!(m.standard_name, "Hemoglobin A1c");
        assert_eq!(m.score, 1.0);

        let m = best_match("hemoglobin", &[], 0.88).unwrap();
        assert_eq!(m.category, "Complete Blood Count");
    }

    #[test]
    fn close_spelling_matches() {
        let m = best_match("triglyceride", &[], 0.88).unwrap();
        assert_eq!(m.category, "Lipids");
        assert_eq!(m.standard_name, "Triglycerides");
    }

    #[test]
    fn unrelated_label_has_no_match() {
        assert!(best_match("zonulin", &[], 0.88).is_none());
    }

    #[test]
    fn learned_names_are_candidates() {
        let learned = vec![("Anti-Mullerian Hormone".to_string(), "Fertility".to_string())];
        let m = best_match("anti-mullerian hormone", &learned, 0.88).unwrap();
        assert_eq!(m.category, "Fertility");
    }

    #[test]
    fn every_category_has_names() {
        for (category, names) in STANDARD_TESTS {
            assert!(!names.is_empty(), "{category} has no standard names");
        }
    }
}
