//! Tolerant parsing of extraction model answers
//!
//! Models wrap JSON in prose or fenced blocks, return a bare array, a single
//! object, or `{"policies": [...]}`. All of those are accepted. An answer
//! with no usable JSON at all is a [`MalformedResponse`].

use authscan_core::{AuthorizationDetail, Evidence, ExtractedPolicyRecord};
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest snippet kept when evidence is rebuilt from structural details
const MAX_BACKFILL_SNIPPET_CHARS: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed extraction response: {0}")]
pub struct MalformedResponse(pub String);

/// Parse every policy record out of a model answer.
pub fn parse_policies(raw: &str) -> Result<Vec<ExtractedPolicyRecord>, MalformedResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MalformedResponse("empty response".to_string()));
    }

    let mut candidates: Vec<Value> = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        candidates.push(value);
    } else {
        for block in fenced_blocks(trimmed) {
            if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
                candidates.push(value);
            }
        }
        if candidates.is_empty() {
            candidates.extend(
                embedded_json(trimmed)
                    .into_iter()
                    .filter_map(|s| serde_json::from_str::<Value>(s).ok()),
            );
        }
    }

    let mut recognized = false;
    let mut records = Vec::new();
    for value in candidates {
        if let Some(items) = policy_items(&value) {
            recognized = true;
            records.extend(items.iter().filter_map(policy_from_value));
        }
    }

    if !recognized {
        return Err(MalformedResponse("no policy JSON found".to_string()));
    }
    Ok(records)
}

fn policy_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("policies") {
                Some(items.clone())
            } else if looks_like_policy(map) {
                Some(vec![value.clone()])
            } else {
                None
            }
        }
        _ => None,
    }
}

fn looks_like_policy(map: &Map<String, Value>) -> bool {
    ["subject", "resource", "action"].iter().any(|k| map.contains_key(*k))
}

fn policy_from_value(value: &Value) -> Option<ExtractedPolicyRecord> {
    let map = value.as_object()?;
    let subject = text_field(map, "subject")?;
    let resource = text_field(map, "resource")?;
    let action = text_field(map, "action")?;

    let conditions = match map.get("conditions") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    let evidence = map
        .get("evidence")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|e| serde_json::from_value::<Evidence>(e.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    Some(ExtractedPolicyRecord {
        subject,
        resource,
        action,
        conditions,
        description: text_field(map, "description").unwrap_or_default(),
        evidence,
    })
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) if !items.is_empty() => Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Bodies of ``` fenced blocks, with any info string dropped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Balanced top-level `{...}` and `[...]` spans in prose.
fn embedded_json(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for (index, ch) in text.char_indices() {
        if start.is_none() {
            if ch == '{' || ch == '[' {
                start = Some(index);
                stack.clear();
                stack.push(ch);
                in_string = false;
                escape = false;
            }
            continue;
        }

        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                let expected = if ch == '}' { '{' } else { '[' };
                if stack.pop() != Some(expected) {
                    start = None;
                    continue;
                }
                if stack.is_empty() {
                    if let Some(begin) = start.take() {
                        spans.push(&text[begin..index + 1]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Give evidence-less records evidence built from the structural details.
pub fn backfill_evidence(records: &mut [ExtractedPolicyRecord], path: &str, details: &[AuthorizationDetail]) {
    for record in records.iter_mut().filter(|r| r.evidence.is_empty()) {
        record.evidence = details
            .iter()
            .map(|d| Evidence {
                file_path: path.to_string(),
                line_start: d.line_start,
                line_end: d.line_end,
                snippet: d.context.chars().take(MAX_BACKFILL_SNIPPET_CHARS).collect(),
            })
            .collect();
    }
}
