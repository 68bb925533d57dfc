//! JSON parsing utilities for LLM responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{SagaError, SagaResult};

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("valid regex"));
static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[a-zA-Z0-9]*\n?([\s\S]*?)\n?```$").expect("valid regex"));
static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

/// Extract JSON from potentially wrapped response (code blocks, prose around an object).
pub fn extract_json(text: &str) -> String {
    let text = text.trim();

    if let Some(content) = CODE_BLOCK_RE.captures(text).and_then(|c| c.get(1)) {
        return content.as_str().trim().to_string();
    }

    // Prose before or after a bare object.
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

/// Remove code fences and thinking tags from response.
pub fn remove_code_blocks(content: &str) -> String {
    let content = content.trim();

    let content = FENCED_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(content);

    THINK_RE.replace_all(content, "").trim().to_string()
}

/// One fact as the model reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFact {
    pub text: String,
    /// Kept as a float so non-integral values can be rejected explicitly.
    pub importance: f64,
}

/// Structured extraction output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedMemory {
    pub world_facts: Vec<RawFact>,
    /// Characters absent from the episode may be missing or map to an empty list.
    #[serde(default)]
    pub character_facts: BTreeMap<String, Vec<RawFact>>,
}

/// Parse the extraction response. Anything that is not a well-formed
/// extraction object is an error; an empty response is not "no facts".
pub fn parse_extraction(response: &str) -> SagaResult<ExtractedMemory> {
    let cleaned = remove_code_blocks(response);
    if cleaned.is_empty() {
        return Err(SagaError::extraction("extraction service returned an empty response"));
    }

    let json_str = extract_json(&cleaned);
    serde_json::from_str(&json_str).map_err(|e| {
        SagaError::extraction(format!("Failed to parse extraction JSON: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_code_block() {
        let input = r#"```json
{"worldFacts": [{"text": "It rains", "importance": 2}]}
```"#;
        let result = extract_json(input);
        assert!(result.starts_with('{'));
        assert!(result.contains("worldFacts"));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let input = r#"Here are the facts: {"worldFacts": []} Hope this helps."#;
        assert_eq!(extract_json(input), r#"{"worldFacts": []}"#);
    }

    #[test]
    fn test_remove_think_tags() {
        let input = "<think>\nlet me see\n</think>{\"worldFacts\": []}";
        assert_eq!(remove_code_blocks(input), "{\"worldFacts\": []}");
    }

    #[test]
    fn test_parse_extraction() {
        let input = r#"{
            "worldFacts": [{"text": "Tsubasa runs the Blue Moon cafe", "importance": 3}],
            "characterFacts": {
                "himuro-nigo": [{"text": "Nigo can stop time", "importance": 5}],
                "misaki": []
            }
        }"#;
        let parsed = parse_extraction(input).unwrap();
        assert_eq!(parsed.world_facts.len(), 1);
        assert_eq!(parsed.character_facts["himuro-nigo"][0].importance, 5.0);
        assert!(parsed.character_facts["misaki"].is_empty());
    }

    #[test]
    fn test_missing_character_facts_is_empty() {
        let parsed = parse_extraction(r#"{"worldFacts": []}"#).unwrap();
        assert!(parsed.character_facts.is_empty());
    }

    #[test]
    fn test_malformed_is_extraction_error() {
        assert!(matches!(parse_extraction(""), Err(SagaError::Extraction { .. })));
        assert!(matches!(parse_extraction("no json here"), Err(SagaError::Extraction { .. })));
        assert!(matches!(
            parse_extraction(r#"{"characterFacts": {}}"#),
            Err(SagaError::Extraction { .. })
        ));
    }
}
