//! Result truncation to keep tool output within a fixed token budget.
//!
//! Whatever shape a result takes — raw string or JSON-serializable value —
//! the character form returned to the agent is capped at a fixed multiple of
//! the token budget (~4 characters per token). Content exactly at the limit
//! passes through untouched; anything over is cut at a character boundary
//! and a deterministic marker block is appended.

use serde_json::Value;

/// Token budget for a single tool result.
pub const TOKEN_BUDGET: usize = 25_000;

/// Empirical characters-per-token multiplier.
pub const CHARS_PER_TOKEN: usize = 4;

/// Character limit derived from the token budget.
pub const CHAR_LIMIT: usize = TOKEN_BUDGET * CHARS_PER_TOKEN;

/// Cap a string result at the configured character limit.
///
/// Returns the input verbatim when it is at or under the limit (closed
/// interval at the top). Otherwise the input is truncated and a marker
/// reporting the approximate token count and the configured budget is
/// appended, with a hint to narrow the query.
pub fn truncate_result(input: &str) -> String {
    truncate_with_limit(input, CHAR_LIMIT, TOKEN_BUDGET)
}

/// Serialize a JSON value (pretty-printed) and cap it at the limit.
///
/// Strings are passed through [`truncate_result`] without re-serialization.
pub fn truncate_value(value: &Value) -> String {
    match value {
        Value::String(s) => truncate_result(s),
        other => {
            let rendered =
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            truncate_result(&rendered)
        }
    }
}

fn truncate_with_limit(input: &str, char_limit: usize, token_budget: usize) -> String {
    if input.len() <= char_limit {
        return input.to_string();
    }

    // Cut at the last valid UTF-8 boundary at or before the limit
    let mut end = char_limit;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }

    let approx_tokens = input.len() / CHARS_PER_TOKEN;
    format!(
        "{}\n\n[Result truncated: ~{approx_tokens} tokens exceeds the {token_budget} token limit. \
         Narrow your query (filter, paginate, or select fewer fields) to see more.]",
        &input[..end]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_string_passes_through() {
        assert_eq!(truncate_result("hello"), "hello");
    }

    #[test]
    fn empty_string_passes_through() {
        assert_eq!(truncate_result(""), "");
    }

    #[test]
    fn content_exactly_at_the_limit_is_not_truncated() {
        let input = "x".repeat(CHAR_LIMIT);
        let out = truncate_result(&input);
        assert_eq!(out, input);
        assert!(!out.contains("truncated"));
    }

    #[test]
    fn one_character_over_the_limit_is_truncated() {
        let input = "x".repeat(CHAR_LIMIT + 1);
        let out = truncate_result(&input);
        assert!(out.contains("[Result truncated:"));
        assert!(out.contains(&format!("{} token limit", TOKEN_BUDGET)));
        // The reported token figure reflects the original size
        assert!(out.contains(&format!("~{} tokens", (CHAR_LIMIT + 1) / CHARS_PER_TOKEN)));
    }

    #[test]
    fn truncation_cuts_at_char_boundary() {
        // Multi-byte characters straddling the limit must not split
        let input = "é".repeat(CHAR_LIMIT); // 2 bytes each, 2x over the limit
        let out = truncate_with_limit(&input, CHAR_LIMIT, TOKEN_BUDGET);
        assert!(out.contains("[Result truncated:"));
        // Must still be valid UTF-8 (guaranteed by String) and not panic
    }

    #[test]
    fn json_value_serialized_within_limit_is_verbatim() {
        let value = json!({ "zones": [{ "id": "z1" }] });
        let out = truncate_value(&value);
        assert_eq!(out, serde_json::to_string_pretty(&value).unwrap());
        assert!(!out.contains("truncated"));
    }

    #[test]
    fn oversized_json_value_is_truncated_with_marker() {
        let big: Vec<String> = (0..40_000).map(|i| format!("zone-{i}")).collect();
        let value = json!(big);
        let out = truncate_value(&value);
        assert!(out.len() < serde_json::to_string_pretty(&value).unwrap().len());
        assert!(out.contains("[Result truncated:"));
    }

    #[test]
    fn string_value_is_not_requoted() {
        let value = Value::String("raw text".into());
        assert_eq!(truncate_value(&value), "raw text");
    }

    #[test]
    fn marker_includes_narrowing_hint() {
        let input = "y".repeat(CHAR_LIMIT * 2);
        let out = truncate_result(&input);
        assert!(out.contains("Narrow your query"));
    }
}
