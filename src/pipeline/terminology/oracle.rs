use serde::Deserialize;

use super::normalize::is_valid_external_code;
use super::ollama::LlmClient;
use super::types::{DisambiguationOracle, LabelContext, OracleVerdict, SearchCandidate};
use super::TerminologyError;
use crate::models::CodeSource;

const ORACLE_SYSTEM: &str = "You map laboratory test names to LOINC codes. \
Answer with a single JSON object and nothing else.";

/// Disambiguation oracle backed by a local LLM.
pub struct LlmOracle<C: LlmClient> {
    client: C,
    model: String,
}

impl<C: LlmClient> LlmOracle<C> {
    pub fn new(client: C, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Build the oracle prompt. With candidates the model must pick one of them;
/// without, it answers from its own knowledge.
pub fn build_oracle_prompt(label: &str, context: &LabelContext, candidates: &[SearchCandidate]) -> String {
    let mut prompt = format!("Test name: {label}\n");
    if let Some(unit) = &context.unit {
        prompt.push_str(&format!("Unit: {unit}\n"));
    }
    if let Some(range) = &context.reference_range {
        prompt.push_str(&format!("Reference range: {range}\n"));
    }

    if candidates.is_empty() {
        prompt.push_str(
            "\nNo indexed candidate matched. If you know the LOINC code for this test, answer \
             {\"code\": \"<code>\"}. Otherwise answer {\"code\": \"NONE\"}.",
        );
    } else {
        prompt.push_str("\nCandidates:\n");
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!("{}. {} | {}\n", i + 1, c.code, c.name));
        }
        prompt.push_str(
            "\nPick the single candidate that is the same test. Answer {\"code\": \"<code>\"}, \
             or {\"code\": \"NONE\"} if none is the same test.",
        );
    }
    prompt
}

#[derive(Deserialize)]
struct OracleAnswer {
    code: Option<String>,
}

/// Parse the oracle answer. The JSON object may be wrapped in prose or a
/// code fence. Anything that is not a valid code becomes `NoMatch`.
pub fn parse_oracle_response(
    response: &str,
    candidates: &[SearchCandidate],
) -> Result<OracleVerdict, TerminologyError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => {
            return Err(TerminologyError::MalformedOracleResponse(
                "no JSON object found".into(),
            ))
        }
    };
    let answer: OracleAnswer = serde_json::from_str(json)
        .map_err(|e| TerminologyError::MalformedOracleResponse(e.to_string()))?;

    let Some(code) = answer.code.map(|c| c.trim().to_string()) else {
        return Ok(OracleVerdict::NoMatch);
    };
    if !is_valid_external_code(&code) {
        return Ok(OracleVerdict::NoMatch);
    }

    let source = if candidates.iter().any(|c| c.code.eq_ignore_ascii_case(&code)) {
        CodeSource::VectorSearch
    } else {
        CodeSource::LlmKnowledge
    };
    Ok(OracleVerdict::Code { code, source })
}

impl<C: LlmClient> DisambiguationOracle for LlmOracle<C> {
    fn disambiguate(
        &self,
        label: &str,
        context: &LabelContext,
        candidates: &[SearchCandidate],
    ) -> Result<OracleVerdict, TerminologyError> {
        let prompt = build_oracle_prompt(label, context, candidates);
        let response = self.client.generate(&self.model, &prompt, ORACLE_SYSTEM)?;
        parse_oracle_response(&response, candidates)
    }
}
