//! Result shapes a worker reply may take
//!
//! Parsers run in table order against an outcome's raw result and the first
//! one that recognizes it decides the verdict. Nothing is merged across
//! shapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)```").expect("fenced block pattern is valid")
});

/// Keys of the worker envelope itself; a map holding any of them is not a
/// worker-id map
const ENVELOPE_KEYS: [&str; 6] = ["taskId", "status", "artifacts", "error", "state", "text"];

/// States counted as success wherever a state label appears
const SUCCESS_STATES: [&str; 5] = ["completed", "success", "succeeded", "done", "ok"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultShape {
    /// Text carrying a JSON array of `{agent, state}`
    StructuredList,
    /// Object mapping known worker ids to result objects
    DirectMap,
    /// `status.state` or a top-level `state`
    TopLevelStatus,
}

/// Judgement of one worker's result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub success: bool,
    /// Shape that produced the verdict; `None` when it was not parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<ResultShape>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Verdict {
    fn parsed(shape: ResultShape, success: bool, detail: Option<String>) -> Self {
        Self {
            success,
            shape: Some(shape),
            detail,
        }
    }

    pub fn unparsed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            shape: None,
            detail: Some(detail.into()),
        }
    }
}

/// Worker ids taking part in the invocation
pub type KnownWorkers = BTreeSet<String>;

pub type ShapeParser = fn(&Value, &KnownWorkers) -> Option<Verdict>;

pub const PARSERS: [(ResultShape, ShapeParser); 3] = [
    (ResultShape::StructuredList, parse_structured_list),
    (ResultShape::DirectMap, parse_direct_map),
    (ResultShape::TopLevelStatus, parse_top_level_status),
];

/// First verdict produced by the parser table
pub fn classify(raw: &Value, known: &KnownWorkers) -> Option<Verdict> {
    PARSERS.iter().find_map(|(_, parser)| parser(raw, known))
}

pub fn is_success_state(state: &str) -> bool {
    let state = state.trim();
    SUCCESS_STATES.iter().any(|s| s.eq_ignore_ascii_case(state))
}

/// Text fields that may carry an embedded structured reply
fn text_candidates(raw: &Value) -> Vec<&str> {
    let mut texts = Vec::new();
    if let Some(artifacts) = raw.get("artifacts").and_then(Value::as_array) {
        for artifact in artifacts {
            if let Some(parts) = artifact.get("parts").and_then(Value::as_array) {
                texts.extend(parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)));
            }
        }
    }
    if let Some(message) = raw.pointer("/status/message").and_then(Value::as_str) {
        texts.push(message);
    }
    if let Some(text) = raw.get("text").and_then(Value::as_str) {
        texts.push(text);
    }
    texts
}

/// JSON values a text may carry: the whole text, fenced blocks, then the
/// outermost bracketed span
fn embedded_json(text: &str, open: char, close: char) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    for captures in FENCED_BLOCK.captures_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            return Some(value);
        }
    }
    let start = trimmed.find(open)?;
    let end = trimmed.rfind(close)?;
    (start < end)
        .then(|| serde_json::from_str::<Value>(&trimmed[start..=end]).ok())
        .flatten()
}

fn parse_structured_list(raw: &Value, _known: &KnownWorkers) -> Option<Verdict> {
    text_candidates(raw).into_iter().find_map(|text| {
        let Value::Array(items) = embedded_json(text, '[', ']')? else {
            return None;
        };
        if items.is_empty() {
            return Some(Verdict::parsed(
                ResultShape::StructuredList,
                false,
                Some("empty result list".to_string()),
            ));
        }

        let mut failed = Vec::new();
        for item in &items {
            let agent = item.get("agent").and_then(Value::as_str)?;
            let state = item.get("state").and_then(Value::as_str)?;
            if !is_success_state(state) {
                failed.push(format!("{agent}: {state}"));
            }
        }

        Some(Verdict::parsed(
            ResultShape::StructuredList,
            failed.is_empty(),
            (!failed.is_empty()).then(|| failed.join(", ")),
        ))
    })
}

fn entry_success(entry: &Value) -> Option<bool> {
    let fields = entry.as_object()?;
    if fields.get("error").map(|e| !e.is_null()).unwrap_or(false) {
        return Some(false);
    }
    if let Some(flag) = fields
        .get("success")
        .or_else(|| fields.get("succeeded"))
        .and_then(Value::as_bool)
    {
        return Some(flag);
    }
    fields
        .get("state")
        .or_else(|| fields.get("status"))
        .and_then(Value::as_str)
        .map(is_success_state)
}

fn direct_map_verdict(
    map: &serde_json::Map<String, Value>,
    known: &KnownWorkers,
) -> Option<Verdict> {
    if map.is_empty()
        || ENVELOPE_KEYS.iter().any(|key| map.contains_key(*key))
        || !map.keys().all(|key| known.contains(key))
    {
        return None;
    }

    let mut failed = Vec::new();
    for (worker_id, entry) in map {
        if !entry_success(entry)? {
            failed.push(worker_id.clone());
        }
    }

    Some(Verdict::parsed(
        ResultShape::DirectMap,
        failed.is_empty(),
        (!failed.is_empty()).then(|| format!("failed: {}", failed.join(", "))),
    ))
}

fn parse_direct_map(raw: &Value, known: &KnownWorkers) -> Option<Verdict> {
    if let Some(verdict) = raw.as_object().and_then(|map| direct_map_verdict(map, known)) {
        return Some(verdict);
    }
    text_candidates(raw).into_iter().find_map(|text| {
        match embedded_json(text, '{', '}')? {
            Value::Object(map) => direct_map_verdict(&map, known),
            _ => None,
        }
    })
}

fn parse_top_level_status(raw: &Value, _known: &KnownWorkers) -> Option<Verdict> {
    let state = raw
        .pointer("/status/state")
        .or_else(|| raw.get("state"))
        .and_then(Value::as_str)?;

    Some(Verdict::parsed(
        ResultShape::TopLevelStatus,
        is_success_state(state),
        (!is_success_state(state)).then(|| format!("state {state}")),
    ))
}
