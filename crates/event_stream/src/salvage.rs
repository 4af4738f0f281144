//! Best-effort recovery of answer text from non-canonical payload locations.
//!
//! This is a compatibility shim, not part of the wire contract. The backend
//! has been observed to place the final answer in different fields depending
//! on the event that carries it, so the accessor list below is
//! backend-specific configuration and may change as the backend does.
//!
//! Lookup order: each named accessor is tried in sequence against the payload
//! and the first non-blank string wins. When all of them miss, a recursive
//! search for the same field names runs, capped at [`DEFAULT_MAX_DEPTH`]
//! levels below the payload root.

use std::fmt;

use serde_json::Value;

/// Maximum nesting depth visited by the fallback search.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Field names the fallback search looks for, in priority order.
pub const DEFAULT_SEARCH_FIELDS: [&str; 3] = ["result", "text", "content"];

/// Typed accessor returning candidate text from a payload.
pub type TextAccessor = fn(&Value) -> Option<String>;

#[derive(Clone)]
pub struct SalvagePolicy {
    accessors: Vec<(&'static str, TextAccessor)>,
    search_fields: Vec<&'static str>,
    max_depth: usize,
}

impl Default for SalvagePolicy {
    fn default() -> Self {
        Self {
            accessors: vec![
                ("result", result_field),
                ("text", text_field),
                ("content", content_string),
                ("content[]", content_blocks),
                ("message.content[]", message_content_blocks),
            ],
            search_fields: DEFAULT_SEARCH_FIELDS.to_vec(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl fmt::Debug for SalvagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.accessors.iter().map(|(name, _)| *name).collect();
        f.debug_struct("SalvagePolicy")
            .field("accessors", &names)
            .field("search_fields", &self.search_fields)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl SalvagePolicy {
    /// Builds a policy from an explicit accessor list.
    #[must_use]
    pub fn new(
        accessors: Vec<(&'static str, TextAccessor)>,
        search_fields: Vec<&'static str>,
        max_depth: usize,
    ) -> Self {
        Self {
            accessors,
            search_fields,
            max_depth,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Returns the first non-blank candidate text found in `payload`.
    #[must_use]
    pub fn extract(&self, payload: &Value) -> Option<String> {
        for (name, accessor) in &self.accessors {
            if let Some(text) = accessor(payload).filter(|text| !text.trim().is_empty()) {
                tracing::debug!(accessor = *name, "salvaged text from payload");
                return Some(text);
            }
        }

        let found = self.search(payload, 0);
        if found.is_some() {
            tracing::debug!("salvaged text from nested payload field");
        }
        found
    }

    /// Same as [`SalvagePolicy::extract`] for a raw JSON string; invalid JSON
    /// yields `None`.
    #[must_use]
    pub fn extract_from_raw(&self, raw: &str) -> Option<String> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|payload| self.extract(&payload))
    }

    fn search(&self, value: &Value, depth: usize) -> Option<String> {
        match value {
            Value::Object(map) => {
                for field in &self.search_fields {
                    let candidate = map.get(*field).and_then(|value| match value {
                        Value::String(text) => Some(text.clone()),
                        Value::Array(_) => text_blocks(value),
                        _ => None,
                    });
                    if let Some(text) = candidate.filter(|text| !text.trim().is_empty()) {
                        return Some(text);
                    }
                }

                if depth >= self.max_depth {
                    return None;
                }
                map.values().find_map(|child| self.search(child, depth + 1))
            }
            Value::Array(items) if depth < self.max_depth => {
                items.iter().find_map(|child| self.search(child, depth + 1))
            }
            _ => None,
        }
    }
}

fn result_field(payload: &Value) -> Option<String> {
    payload.get("result")?.as_str().map(ToOwned::to_owned)
}

fn text_field(payload: &Value) -> Option<String> {
    payload.get("text")?.as_str().map(ToOwned::to_owned)
}

fn content_string(payload: &Value) -> Option<String> {
    payload.get("content")?.as_str().map(ToOwned::to_owned)
}

fn content_blocks(payload: &Value) -> Option<String> {
    text_blocks(payload.get("content")?)
}

fn message_content_blocks(payload: &Value) -> Option<String> {
    text_blocks(payload.get("message")?.get("content")?)
}

/// Concatenates the `text` of every `{type: "text"}` entry in an array.
fn text_blocks(value: &Value) -> Option<String> {
    let blocks = value.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
