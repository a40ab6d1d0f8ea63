//! Turn raw model output into extractions.
//!
//! Accepts a bare JSON document or the first fenced code block in the text.
//! The top level is either `{"extractions": [...]}` or a bare array, and
//! each item takes one of two shapes:
//!
//! - explicit: `{"extraction_class": "...", "extraction_text": "...", "attributes": {...}, "confidence": 0.9}`
//! - keyed: `{"medication": "aspirin", "medication_attributes": {...}}`

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{ExtractionError, Result};
use crate::types::extraction::Extraction;

/// Suffix marking a keyed item's attribute object.
pub const ATTRIBUTE_SUFFIX: &str = "_attributes";

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

/// The JSON payload inside a model response.
fn payload(raw: &str) -> &str {
    match FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().trim(),
        None => raw.trim(),
    }
}

/// Parse a model response into extractions tagged with the pass they came from.
///
/// Items missing a class or text are skipped. Invalid JSON is an error.
pub fn parse_extractions(raw: &str, pass: usize) -> Result<Vec<Extraction>> {
    let payload = payload(raw);
    if payload.is_empty() {
        return Err(ExtractionError::Parse {
            reason: "empty response".to_string(),
        });
    }

    let value: Value = serde_json::from_str(payload).map_err(|e| ExtractionError::Parse {
        reason: format!("invalid JSON: {}", e),
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("extractions") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            _ => {
                return Err(ExtractionError::Parse {
                    reason: "expected an \"extractions\" array".to_string(),
                })
            }
        },
        _ => {
            return Err(ExtractionError::Parse {
                reason: "expected a JSON object or array".to_string(),
            })
        }
    };

    let mut extractions = Vec::new();
    for (position, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            debug!(position, "Skipping non-object extraction item");
            continue;
        };

        let parsed = if map.contains_key("extraction_class") || map.contains_key("extraction_text") {
            explicit_item(map).into_iter().collect()
        } else {
            keyed_items(map)
        };

        if parsed.is_empty() {
            debug!(position, "Skipping extraction item without class or text");
        }

        for mut extraction in parsed {
            extraction.index = Some(extractions.len());
            extraction.group_index = Some(pass);
            extractions.push(extraction);
        }
    }

    Ok(extractions)
}

fn explicit_item(mut map: Map<String, Value>) -> Option<Extraction> {
    let class = map.remove("extraction_class").and_then(text_of)?;
    let text = map.remove("extraction_text").and_then(text_of)?;

    let mut extraction = Extraction::new(class, text);
    extraction.confidence = map.get("confidence").and_then(confidence_of);
    if let Some(Value::Object(attributes)) = map.remove("attributes") {
        extraction.attributes = attributes.into_iter().collect();
    }

    Some(extraction)
}

fn keyed_items(map: Map<String, Value>) -> Vec<Extraction> {
    let confidence = map.get("confidence").and_then(confidence_of);

    let mut attribute_sets: IndexMap<String, Map<String, Value>> = IndexMap::new();
    let mut pairs = Vec::new();

    for (key, value) in map {
        if key == "confidence" {
            continue;
        }
        match key.strip_suffix(ATTRIBUTE_SUFFIX) {
            Some(class) => {
                if let Value::Object(attributes) = value {
                    attribute_sets.insert(class.to_string(), attributes);
                }
            }
            None => pairs.push((key, value)),
        }
    }

    pairs
        .into_iter()
        .filter_map(|(class, value)| {
            let text = text_of(value)?;
            if class.trim().is_empty() {
                return None;
            }

            let mut extraction = Extraction::new(class.clone(), text);
            extraction.confidence = confidence;
            if let Some(attributes) = attribute_sets.swap_remove(&class) {
                extraction.attributes = attributes.into_iter().collect();
            }
            Some(extraction)
        })
        .collect()
}

/// Text of a scalar value; numbers and booleans are stringified.
fn text_of(value: Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn confidence_of(value: &Value) -> Option<f64> {
    let confidence = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(confidence.clamp(0.0, 1.0))
}
