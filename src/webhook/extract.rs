//! Pull planner content out of an arbitrary webhook payload
//!
//! Strategies are tried in order and the first that yields non-blank text
//! wins. The last one serializes the whole payload, so extraction never
//! comes back empty-handed.

use serde_json::Value;

/// Keys that commonly carry the human-readable body of an event
pub const CONTENT_KEYS: [&str; 5] = ["content", "transcript", "text", "message", "body"];

/// Envelope keys some senders nest the event under
pub const ENVELOPE_KEYS: [&str; 2] = ["data", "payload"];

/// A named extraction step
#[derive(Debug, Clone, Copy)]
pub struct ExtractionStrategy {
    pub name: &'static str,
    pub extract: fn(&Value) -> Option<String>,
}

/// Content chosen for the planner and the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub strategy: &'static str,
    pub content: String,
}

pub const STRATEGIES: [ExtractionStrategy; 4] = [
    ExtractionStrategy {
        name: "top_level_field",
        extract: top_level_field,
    },
    ExtractionStrategy {
        name: "nested_field",
        extract: nested_field,
    },
    ExtractionStrategy {
        name: "string_payload",
        extract: string_payload,
    },
    ExtractionStrategy {
        name: "whole_payload",
        extract: whole_payload,
    },
];

/// Run the strategies in order against `payload`
pub fn extract_content(payload: &Value) -> ExtractedContent {
    STRATEGIES
        .iter()
        .find_map(|strategy| {
            (strategy.extract)(payload).map(|content| ExtractedContent {
                strategy: strategy.name,
                content,
            })
        })
        .unwrap_or_else(|| ExtractedContent {
            strategy: "empty",
            content: String::new(),
        })
}

fn non_blank(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn top_level_field(payload: &Value) -> Option<String> {
    CONTENT_KEYS
        .iter()
        .find_map(|key| payload.get(key).and_then(non_blank))
}

fn nested_field(payload: &Value) -> Option<String> {
    ENVELOPE_KEYS
        .iter()
        .filter_map(|envelope| payload.get(envelope))
        .find_map(top_level_field)
}

fn string_payload(payload: &Value) -> Option<String> {
    non_blank(payload)
}

fn whole_payload(payload: &Value) -> Option<String> {
    match payload {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => serde_json::to_string_pretty(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_top_level_field_order() {
        let payload = json!({"message": "second", "transcript": "first"});
        let extracted = extract_content(&payload);
        assert_eq!(extracted.strategy, "top_level_field");
        assert_eq!(extracted.content, "first");
    }

    #[test]
    fn test_blank_fields_are_skipped() {
        let payload = json!({"content": "   ", "data": {"text": "nested text"}});
        let extracted = extract_content(&payload);
        assert_eq!(extracted.strategy, "nested_field");
        assert_eq!(extracted.content, "nested text");
    }

    #[test]
    fn test_string_payload() {
        let extracted = extract_content(&json!("raw transcript"));
        assert_eq!(extracted.strategy, "string_payload");
        assert_eq!(extracted.content, "raw transcript");
    }

    #[test]
    fn test_whole_payload_fallback() {
        let payload = json!({"event": "push", "commits": 3});
        let extracted = extract_content(&payload);
        assert_eq!(extracted.strategy, "whole_payload");
        assert!(extracted.content.contains("\"commits\": 3"));
    }

    #[test]
    fn test_null_payload_is_empty() {
        let extracted = extract_content(&Value::Null);
        assert_eq!(extracted.strategy, "empty");
        assert!(extracted.content.is_empty());
    }

    #[test]
    fn test_non_string_content_field_falls_through() {
        let payload = json!({"content": {"rich": true}});
        assert_eq!(extract_content(&payload).strategy, "whole_payload");
    }

    proptest! {
        #[test]
        fn prop_top_level_content_is_returned_trimmed(text in "[a-zA-Z0-9 ]{0,40}[a-zA-Z0-9]") {
            let payload = json!({"content": format!("  {text}  ")});
            let extracted = extract_content(&payload);
            prop_assert_eq!(extracted.strategy, "top_level_field");
            prop_assert_eq!(extracted.content, text.trim().to_string());
        }

        #[test]
        fn prop_any_object_yields_content(key in "[a-z]{1,8}", n in any::<i64>()) {
            let payload = json!({ key: n });
            prop_assert!(!extract_content(&payload).content.is_empty());
        }
    }
}
