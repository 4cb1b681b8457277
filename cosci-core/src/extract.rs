//! Structured-block extraction from free-form backend output.
//!
//! Model responses mix prose, markdown fences and JSON. Everything here is
//! pure: a balanced-brace scan that understands JSON strings and escapes,
//! preferring the first fenced block when one is present.

use crate::error::ParseError;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```[a-zA-Z]*\n([\s\S]*?)```").expect("valid fence regex"))
}

/// Return the first balanced `{...}` object in `text`.
///
/// A fenced block (```` ```json ... ``` ````) is searched first; if it holds
/// no object the whole text is scanned.
pub fn extract_structured_block(text: &str) -> Option<&str> {
    if text.is_empty() {
        return None;
    }
    if let Some(inner) = fence_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| first_balanced_object(m.as_str()))
    {
        return Some(inner);
    }
    first_balanced_object(text)
}

/// Balanced scan starting at the first `{`. Braces inside string literals
/// are ignored; `\"` does not close a string.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if depth == 0 {
            if b == b'{' {
                depth = 1;
                start = Some(i);
            }
            continue;
        }

        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    // Only ASCII delimiters are used as bounds, so the slice is on char boundaries.
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the structured block and parse it as a JSON value.
pub fn parse_json_block(text: &str) -> Result<serde_json::Value, ParseError> {
    let block = extract_structured_block(text).ok_or(ParseError::NoStructuredBlock)?;
    serde_json::from_str(block).map_err(|e| ParseError::InvalidJson {
        message: e.to_string(),
    })
}

/// Extract the structured block and deserialize it into `T`.
pub fn parse_block_as<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = parse_json_block(text)?;
    serde_json::from_value(value).map_err(|e| ParseError::InvalidJson {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_structured_block(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_surrounding_prose() {
        let text = "Sure! Here is my answer: {\"winner\": 1} Hope that helps.";
        assert_eq!(extract_structured_block(text), Some("{\"winner\": 1}"));
    }

    #[test]
    fn test_nested_objects() {
        let text = "x {\"a\": {\"b\": {\"c\": 2}}, \"d\": 3} y {\"e\": 4}";
        assert_eq!(
            extract_structured_block(text),
            Some("{\"a\": {\"b\": {\"c\": 2}}, \"d\": 3}")
        );
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let text = r#"{"rationale": "use {braces} and \"quoted } text\"", "winner": 2}"#;
        assert_eq!(extract_structured_block(text), Some(text));
    }

    #[test]
    fn test_fenced_block_preferred() {
        let text = "Draft {\"draft\": true}\n```json\n{\"final\": true}\n```\n";
        assert_eq!(extract_structured_block(text), Some("{\"final\": true}"));
    }

    #[test]
    fn test_fence_without_object_falls_back_to_full_scan() {
        let text = "```\nno json here\n```\nthen {\"ok\": 1}";
        assert_eq!(extract_structured_block(text), Some("{\"ok\": 1}"));
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_structured_block("{\"a\": {\"b\": 1}"), None);
        assert_eq!(extract_structured_block("no braces"), None);
        assert_eq!(extract_structured_block(""), None);
    }

    #[test]
    fn test_multibyte_text_around_block() {
        let text = "Résumé → {\"titre\": \"café\"} ✓";
        assert_eq!(extract_structured_block(text), Some("{\"titre\": \"café\"}"));
    }

    #[test]
    fn test_parse_json_block_errors() {
        assert_eq!(
            parse_json_block("nothing"),
            Err(ParseError::NoStructuredBlock)
        );
        assert!(matches!(
            parse_json_block("{not json}"),
            Err(ParseError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_parse_block_as_typed() {
        #[derive(serde::Deserialize)]
        struct Verdict {
            winner: u8,
        }
        let v: Verdict = parse_block_as("result: {\"winner\": 2}").unwrap();
        assert_eq!(v.winner, 2);
    }
}
