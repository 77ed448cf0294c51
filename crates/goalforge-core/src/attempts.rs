//! Retry budget normalization and the context carried between attempts.

use serde::{Deserialize, Serialize};

/// Upper bound on attempts per stage, whatever the configuration says.
pub const MAX_STAGE_ATTEMPTS: u32 = 8;

const DEFAULT_SEQUENCE: [u32; 2] = [1, 2];

/// Configured attempt budget: either a count (`3`) or an explicit list (`[1, 3]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttemptSpec {
    Count(i64),
    List(Vec<i64>),
}

impl Default for AttemptSpec {
    fn default() -> Self {
        AttemptSpec::Count(DEFAULT_SEQUENCE.len() as i64)
    }
}

impl AttemptSpec {
    /// Parse `"3"` or `"1,3"` as used by environment variables and CLI flags.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
        if trimmed.contains(',') {
            let values: Result<Vec<i64>, _> =
                trimmed.split(',').map(|part| part.trim().parse::<i64>()).collect();
            return values.ok().map(AttemptSpec::List);
        }
        trimmed.parse::<i64>().ok().map(AttemptSpec::Count)
    }
}

/// Normalize an attempt budget into an ascending, deduplicated list of positive integers.
///
/// Anything unusable falls back to `[1, 2]`. The last element is the final attempt.
pub fn attempt_sequence(spec: &AttemptSpec) -> Vec<u32> {
    let mut sequence: Vec<u32> = match spec {
        AttemptSpec::Count(count) if *count >= 1 => {
            let count = (*count).min(i64::from(MAX_STAGE_ATTEMPTS)) as u32;
            (1..=count).collect()
        }
        AttemptSpec::Count(_) => Vec::new(),
        AttemptSpec::List(values) => values
            .iter()
            .filter(|value| **value >= 1)
            .map(|value| (*value).min(i64::from(MAX_STAGE_ATTEMPTS)) as u32)
            .collect(),
    };
    sequence.sort_unstable();
    sequence.dedup();
    if sequence.is_empty() {
        DEFAULT_SEQUENCE.to_vec()
    } else {
        sequence
    }
}

/// What went wrong in the attempt a [`RetryContext`] describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryKind {
    Parse,
    SearchNotFound,
    SearchAmbiguous,
    Scope,
    EmptyEdits,
    MissingFile,
    #[default]
    Other,
}

/// Hints carried from a failed attempt into the next prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryContext {
    #[serde(default)]
    pub kind: RetryKind,
    pub message: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_snippet: Option<String>,
}

impl RetryContext {
    pub fn new(kind: RetryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_scope_warning(mut self, warning: impl Into<String>) -> Self {
        self.scope_warning = Some(warning.into());
        self
    }

    pub fn with_suggested_paths(mut self, paths: Vec<String>) -> Self {
        if !paths.is_empty() {
            self.suggested_paths = Some(paths);
        }
        self
    }

    pub fn with_search_snippet(mut self, snippet: impl Into<String>) -> Self {
        let snippet = snippet.into();
        if !snippet.trim().is_empty() {
            self.search_snippet = Some(snippet);
        }
        self
    }
}
