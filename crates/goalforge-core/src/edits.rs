//! Edit model and the edit-list parser for model responses.

use crate::json_extract::extract_json;
use crate::loose_json::try_parse_loose_json;
use crate::normalize::normalize_response;
use crate::util::clip;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const EXCERPT_CHARS: usize = 160;

/// One search/replace instruction inside a `modify` edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementPair {
    pub search: String,
    pub replace: String,
}

impl ReplacementPair {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// One atomic file mutation proposed by the model.
///
/// `path` is repo-relative with forward slashes; it is empty when the model supplied an
/// unusable path. `Upsert::content` is `None` when the model sent non-string content.
/// Both cases are counted as skipped by the application engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Edit {
    Modify {
        path: String,
        replacements: Vec<ReplacementPair>,
    },
    Upsert {
        path: String,
        content: Option<String>,
    },
    Delete {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
}

impl Edit {
    pub fn path(&self) -> &str {
        match self {
            Edit::Modify { path, .. } | Edit::Upsert { path, .. } | Edit::Delete { path, .. } => {
                path
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Edit::Modify { .. } => "modify",
            Edit::Upsert { .. } => "upsert",
            Edit::Delete { .. } => "delete",
        }
    }

    pub fn set_path(&mut self, new_path: String) {
        match self {
            Edit::Modify { path, .. } | Edit::Upsert { path, .. } | Edit::Delete { path, .. } => {
                *path = new_path
            }
        }
    }
}

/// The model produced JSON that neither strict nor loose parsing could read.
#[derive(Debug, Clone, Error)]
#[error("Model response contained malformed JSON: {message}")]
pub struct EditParseError {
    pub message: String,
    pub excerpt: String,
}

/// Normalize a model-supplied path to repo-relative, forward-slash form.
///
/// Returns an empty string for paths that are blank or try to escape the repository.
pub fn normalize_repo_path(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .replace('\\', "/");
    let mut parts = Vec::new();
    for part in trimmed.split('/') {
        match part.trim() {
            "" | "." => continue,
            ".." => return String::new(),
            segment => parts.push(segment),
        }
    }
    parts.join("/")
}

/// Parse a model response into a JSON value using normalize → extract → strict → loose.
///
/// `Ok(None)` means no JSON span was found. `Err` means a span was found but could not be
/// parsed even after loose repair.
pub fn parse_json_response(response: &str) -> Result<Option<Value>, EditParseError> {
    let normalized = normalize_response(response);
    let Some(candidate) = extract_json(&normalized) else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(Some(value)),
        Err(strict_err) => match try_parse_loose_json(candidate) {
            Some(value) => {
                tracing::debug!("recovered model JSON with loose repair");
                Ok(Some(value))
            }
            None => Err(EditParseError {
                message: strict_err.to_string(),
                excerpt: clip(candidate, EXCERPT_CHARS),
            }),
        },
    }
}

fn string_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_str))
}

fn parse_replacement(value: &Value) -> Option<ReplacementPair> {
    let obj = value.as_object()?;
    let search = string_field(obj, &["search", "old_string", "oldString", "find"])?;
    let replace = string_field(obj, &["replace", "new_string", "newString", "replacement"])
        .unwrap_or_default();
    Some(ReplacementPair::new(search, replace))
}

fn parse_edit(value: &Value) -> Option<Edit> {
    let obj = value.as_object()?;
    let raw_path = string_field(obj, &["path", "filePath", "file"]).unwrap_or_default();
    let path = normalize_repo_path(raw_path);
    let kind = string_field(obj, &["type", "op", "action"])
        .map(|kind| kind.trim().to_ascii_lowercase())
        .unwrap_or_else(|| {
            if obj.contains_key("replacements") {
                "modify".to_string()
            } else if obj.contains_key("content") {
                "upsert".to_string()
            } else {
                String::new()
            }
        });

    match kind.as_str() {
        "modify" | "edit" | "replace" => {
            let replacements = obj.get("replacements")?.as_array()?;
            let pairs: Vec<ReplacementPair> =
                replacements.iter().filter_map(parse_replacement).collect();
            if pairs.len() != replacements.len() {
                tracing::debug!(path = %path, "dropped malformed replacement pairs");
            }
            Some(Edit::Modify {
                path,
                replacements: pairs,
            })
        }
        "upsert" | "create" | "write" => Some(Edit::Upsert {
            path,
            content: obj.get("content").and_then(Value::as_str).map(str::to_string),
        }),
        "delete" | "remove" => Some(Edit::Delete {
            path,
            recursive: obj
                .get("recursive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        other => {
            tracing::debug!(kind = other, "dropped edit with unknown type");
            None
        }
    }
}

/// Turn a parsed JSON value into edits: `{"edits": [...]}`, a bare array, or one edit.
pub fn edits_from_value(value: &Value) -> Vec<Edit> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match obj.get("edits") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            Some(_) => Vec::new(),
            None if obj.contains_key("path") => vec![value],
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    let total = entries.len();
    let edits: Vec<Edit> = entries.into_iter().filter_map(parse_edit).collect();
    if edits.len() != total {
        tracing::debug!(
            kept = edits.len(),
            dropped = total - edits.len(),
            "dropped malformed edit entries"
        );
    }
    edits
}

/// Parse a model response into an edit list.
///
/// Returns `Ok(vec![])` when the model said nothing usable, and `Err` only when it emitted
/// JSON that is corrupt beyond loose repair.
pub fn parse_edit_list(response: &str) -> Result<Vec<Edit>, EditParseError> {
    Ok(parse_json_response(response)?
        .map(|value| edits_from_value(&value))
        .unwrap_or_default())
}
