//! Recovery of structured data from free-text generator output.
//!
//! The steps are independent and each is idempotent:
//! - [`strip_wrapper`]: drop a code fence wrapping the *whole* response
//! - [`trim_trailing_commas`]: remove `,` directly before `}` / `]`
//! - [`balance_delimiters`]: append the closers a truncated response is missing
//!
//! [`sanitize`] and [`repair`] compose them; [`parse_structured`] runs the
//! full chain and deserializes, surfacing a typed [`SanitizeError`].

use serde::de::DeserializeOwned;
use thiserror::Error;

const FENCE: &str = "```";
const EXCERPT_LEN: usize = 160;

/// The text could not be recovered into the expected shape. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("generator returned an empty response")]
    Empty,

    #[error("malformed output: {reason} (excerpt: {excerpt:?})")]
    Malformed { reason: String, excerpt: String },
}

impl SanitizeError {
    fn malformed(reason: impl Into<String>, text: &str) -> Self {
        Self::Malformed {
            reason: reason.into(),
            excerpt: text.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

/// Strip a fenced code-block wrapper when it encloses the entire response.
///
/// The opening fence may carry an alphanumeric language tag (` ```json `).
/// If another fence appears inside, the text is returned untouched (trimmed):
/// the response is a document containing code, not a wrapped payload.
pub fn strip_wrapper(raw: &str) -> String {
    let text = raw.trim();
    if text.len() < 2 * FENCE.len() || !text.starts_with(FENCE) || !text.ends_with(FENCE) {
        return text.to_string();
    }

    let after_open = &text[FENCE.len()..];
    let Some(newline) = after_open.find('\n') else {
        return text.to_string();
    };

    let tag = after_open[..newline].trim_end_matches('\r');
    if !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return text.to_string();
    }

    let body_start = newline + 1;
    let body_end = after_open.len() - FENCE.len();
    if body_start > body_end {
        return text.to_string();
    }

    let body = &after_open[body_start..body_end];
    if body.contains(FENCE) {
        return text.to_string();
    }

    body.trim().to_string()
}

/// Remove commas that (ignoring whitespace and further commas) are followed by
/// a closing `}` or `]`. String literals are left alone.
pub fn trim_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (idx, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[idx + 1..]
                    .iter()
                    .find(|n| !n.is_whitespace() && **n != ',');
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Close an unterminated string and append the missing `}` / `]` in nesting
/// order. Stray closers with no matching opener are left in place.
pub fn balance_delimiters(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    if !in_string && stack.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + stack.len() + 2);
    out.push_str(text);
    if in_string {
        if escaped {
            out.push('\\');
        }
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Normalize raw output into a parse candidate.
pub fn sanitize(raw: &str) -> String {
    strip_wrapper(raw)
}

/// Best-effort structural repair of a candidate.
pub fn repair(candidate: &str) -> String {
    trim_trailing_commas(&balance_delimiters(candidate))
}

/// Run the full recovery chain and deserialize into `T`.
///
/// Falls back to the first `{` / `[` when the model put prose before the payload.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, SanitizeError> {
    let candidate = repair(&sanitize(raw));
    if candidate.is_empty() {
        return Err(SanitizeError::Empty);
    }

    let first_err = match serde_json::from_str::<T>(&candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(start) = candidate.find(['{', '[']) {
        if start > 0 {
            let tail = repair(&candidate[start..]);
            if let Ok(value) = serde_json::from_str::<T>(&tail) {
                return Ok(value);
            }
        }
    }

    Err(SanitizeError::malformed(first_err.to_string(), &candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    #[test]
    fn strips_whole_response_fence() {
        assert_eq!(strip_wrapper("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_wrapper("  ```\n[1, 2]\n```  "), "[1, 2]");
        assert_eq!(strip_wrapper("```JSON\r\n{}\r\n```"), "{}");
    }

    #[test]
    fn keeps_documents_with_nested_fences() {
        let doc = "```markdown\n# Title\n```rust\nfn main() {}\n```\n```";
        assert_eq!(strip_wrapper(doc), doc);
    }

    #[test]
    fn keeps_partial_or_unwrapped_text() {
        assert_eq!(strip_wrapper("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_wrapper("```json\n{\"a\": 1}"), "```json\n{\"a\": 1}");
        assert_eq!(strip_wrapper("see ```code``` here"), "see ```code``` here");
        assert_eq!(strip_wrapper("```not a tag\nx\n```"), "```not a tag\nx\n```");
    }

    #[test]
    fn trailing_commas_are_removed_outside_strings() {
        assert_eq!(trim_trailing_commas("{\"a\": 1,}"), "{\"a\": 1}");
        assert_eq!(trim_trailing_commas("[1, 2, ]"), "[1, 2 ]");
        assert_eq!(trim_trailing_commas("[1,,]"), "[1]");
        assert_eq!(trim_trailing_commas("{\"a\": \",}\"}"), "{\"a\": \",}\"}");
        assert_eq!(trim_trailing_commas("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn balancing_appends_missing_closers_in_order() {
        assert_eq!(balance_delimiters("{\"a\": [1, 2"), "{\"a\": [1, 2]}");
        assert_eq!(balance_delimiters("{\"a\": \"trunc"), "{\"a\": \"trunc\"}");
        assert_eq!(balance_delimiters("{\"a\": \"x\\"), "{\"a\": \"x\\\\\"}");
        assert_eq!(balance_delimiters("{\"a\": \"{[\"}"), "{\"a\": \"{[\"}");
        assert_eq!(balance_delimiters("[]]"), "[]]");
    }

    #[test]
    fn parses_fenced_truncated_output() {
        let raw = "```json\n{\"sections\": [{\"title\": \"Intro\", \"articles\": [\"a\", \"b\",\n```";
        let value: Value = parse_structured(raw).unwrap();
        assert_eq!(
            value,
            json!({"sections": [{"title": "Intro", "articles": ["a", "b"]}]})
        );
    }

    #[test]
    fn parses_payload_after_prose() {
        let value: Value = parse_structured("Here you go: {\"ok\": true,}").unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn unrecoverable_output_is_a_typed_error() {
        assert_eq!(parse_structured::<Value>("   "), Err(SanitizeError::Empty));
        match parse_structured::<Value>("I cannot help with that") {
            Err(SanitizeError::Malformed { excerpt, .. }) => {
                assert_eq!(excerpt, "I cannot help with that")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn repair_is_idempotent_on_examples() {
        for input in ["{\"a\": [1,", "[{\"x\": \"y", "{}", "]{", "{\"k\": \"v\\"] {
            let once = repair(input);
            assert_eq!(repair(&once), once, "input={input:?}");
        }
    }

    fn json_like() -> impl Strategy<Value = String> {
        prop_oneof![
            "[\\{\\}\\[\\],:\"\\\\a-z0-9 \n`]{0,48}",
            "[\\{\\}\\[\\],:\"\\\\a-z0-9 \n]{0,48}".prop_map(|s| format!("```json\n{s}\n```")),
            "[\\{\\}\\[\\],:\"a-z ]{0,32}".prop_map(|s| format!("  ```\n{s}")),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            .. ProptestConfig::default()
        })]

        #[test]
        fn sanitize_then_repair_reaches_fixed_point(raw in json_like()) {
            let once = sanitize(&repair(&raw));
            let twice = sanitize(&repair(&once));
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn each_step_is_idempotent(raw in json_like()) {
            let stripped = strip_wrapper(&raw);
            prop_assert_eq!(strip_wrapper(&stripped), stripped.clone());

            let trimmed = trim_trailing_commas(&raw);
            prop_assert_eq!(trim_trailing_commas(&trimmed), trimmed.clone());

            let balanced = balance_delimiters(&raw);
            prop_assert_eq!(balance_delimiters(&balanced), balanced.clone());
        }
    }
}
