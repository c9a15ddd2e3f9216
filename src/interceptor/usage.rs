//! Locating token usage in pipeline result metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where token counts live in a result's metadata.
///
/// Each field is a dotted path, so `usage` and `response_metadata.usage`
/// both work. Backends disagree on these names, hence the overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageFields {
    /// Path to the usage record inside the metadata
    pub token_usage_field: String,
    /// Field in the usage record holding prompt plus completion tokens
    pub total_tokens_field: String,
    /// Field in the usage record holding prompt tokens only
    pub prompt_tokens_field: String,
}

impl Default for UsageFields {
    fn default() -> Self {
        Self {
            token_usage_field: "tokenUsage".to_string(),
            total_tokens_field: "totalTokens".to_string(),
            prompt_tokens_field: "promptTokens".to_string(),
        }
    }
}

impl UsageFields {
    /// Token cost recorded in `llm_output`.
    ///
    /// Counts total tokens when `include_output_tokens` is set and prompt
    /// tokens otherwise. Returns `None` when the record is missing or the
    /// count is not a non-negative number.
    pub fn token_count(&self, llm_output: &Value, include_output_tokens: bool) -> Option<u64> {
        let usage = lookup(llm_output, &self.token_usage_field)?;
        let field = if include_output_tokens {
            &self.total_tokens_field
        } else {
            &self.prompt_tokens_field
        };
        as_tokens(lookup(usage, field)?)
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

fn as_tokens(value: &Value) -> Option<u64> {
    if let Some(count) = value.as_u64() {
        return Some(count);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usage(prompt: u64, total: u64) -> Value {
        json!({ "tokenUsage": { "promptTokens": prompt, "completionTokens": total - prompt, "totalTokens": total } })
    }

    #[test]
    fn test_prompt_tokens_only_by_default() {
        let fields = UsageFields::default();
        assert_eq!(fields.token_count(&usage(10, 30), false), Some(10));
    }

    #[test]
    fn test_include_output_tokens_uses_total() {
        let fields = UsageFields::default();
        assert_eq!(fields.token_count(&usage(10, 30), true), Some(30));
    }

    #[test]
    fn test_missing_fields_yield_none() {
        let fields = UsageFields::default();
        assert_eq!(fields.token_count(&json!({}), false), None);
        assert_eq!(fields.token_count(&json!({ "tokenUsage": {} }), true), None);
        assert_eq!(fields.token_count(&json!("text"), false), None);
        assert_eq!(
            fields.token_count(&json!({ "tokenUsage": { "promptTokens": "ten" } }), false),
            None
        );
        assert_eq!(
            fields.token_count(&json!({ "tokenUsage": { "promptTokens": -4 } }), false),
            None
        );
    }

    #[test]
    fn test_dotted_path_overrides() {
        let fields = UsageFields {
            token_usage_field: "response_metadata.usage".to_string(),
            total_tokens_field: "total_tokens".to_string(),
            prompt_tokens_field: "input_tokens".to_string(),
        };
        let output = json!({
            "response_metadata": { "usage": { "input_tokens": 12, "total_tokens": 40 } }
        });

        assert_eq!(fields.token_count(&output, false), Some(12));
        assert_eq!(fields.token_count(&output, true), Some(40));
        assert_eq!(fields.token_count(&usage(10, 30), false), None);
    }

    #[test]
    fn test_float_counts_are_rounded() {
        let fields = UsageFields::default();
        let output = json!({ "tokenUsage": { "promptTokens": 10.0 } });
        assert_eq!(fields.token_count(&output, false), Some(10));
    }
}
