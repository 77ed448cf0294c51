//! Scope contract for a goal and the validator that fences edits to it.

use crate::edits::{normalize_repo_path, Edit};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Test directories recognized when a `mustAvoid` entry talks about tests in prose.
pub const KNOWN_TEST_DIRS: &[&str] = &[
    "__tests__/",
    "tests/",
    "test/",
    "backend/tests/",
    "backend/test/",
    "frontend/tests/",
    "frontend/src/__tests__/",
    "frontend/__tests__/",
];

/// Agreed blast radius for a goal, computed once before the testing phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeReflection {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub must_change: Vec<String>,
    #[serde(default)]
    pub must_avoid: Vec<String>,
    #[serde(default)]
    pub must_have: Vec<String>,
    #[serde(default = "default_tests_needed")]
    pub tests_needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_asset_paths: Option<Vec<String>>,
}

fn default_tests_needed() -> bool {
    true
}

impl Default for ScopeReflection {
    fn default() -> Self {
        Self {
            reasoning: String::new(),
            must_change: Vec::new(),
            must_avoid: Vec::new(),
            must_have: Vec::new(),
            tests_needed: true,
            required_asset_paths: None,
        }
    }
}

impl ScopeReflection {
    /// A failing-test context always requires the testing stage.
    pub fn force_tests_needed(&mut self) {
        if !self.tests_needed {
            tracing::info!("failing-test context detected; forcing testsNeeded=true");
            self.tests_needed = true;
        }
    }

    /// Path prefixes no edit may touch.
    pub fn avoid_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = Vec::new();
        let mut push = |prefix: String| {
            if !prefix.is_empty() && !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        };

        for entry in &self.must_avoid {
            if let Some(prefix) = path_like_prefix(entry) {
                push(prefix);
                continue;
            }
            let lower = entry.to_ascii_lowercase();
            if lower.contains("backend") {
                push("backend/".to_string());
            }
            if lower.contains("frontend") {
                push("frontend/".to_string());
            }
            if lower.contains("test") {
                for dir in KNOWN_TEST_DIRS {
                    push((*dir).to_string());
                }
            }
        }
        prefixes
    }
}

/// Entries without whitespace that contain a slash or a file extension are paths.
fn path_like_prefix(entry: &str) -> Option<String> {
    let trimmed = entry.trim().trim_matches('`');
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    let has_extension = trimmed
        .rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or(false);
    if !trimmed.contains('/') && !trimmed.contains('\\') && !has_extension {
        return None;
    }
    let (literal, has_glob) = match trimmed.find('*') {
        Some(idx) => (&trimmed[..idx], true),
        None => (trimmed, false),
    };
    let normalized = normalize_repo_path(literal);
    if normalized.is_empty() {
        return None;
    }
    if has_glob || literal.ends_with('/') {
        Some(format!("{}/", normalized))
    } else {
        Some(normalized)
    }
}

/// True for `__tests__/` paths and `.test.` / `.spec.` file names.
pub fn is_test_file_path(path: &str) -> bool {
    let normalized = normalize_repo_path(path);
    if normalized.starts_with("__tests__/") || normalized.contains("/__tests__/") {
        return true;
    }
    let file_name = normalized.rsplit('/').next().unwrap_or_default();
    file_name.contains(".test.") || file_name.contains(".spec.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    TestsNotNeeded,
    ForbiddenArea,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::TestsNotNeeded => "tests-not-needed",
            ViolationKind::ForbiddenArea => "forbidden-area",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edit left the agreed scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Scope violation ({kind}) for {path}: {rule}")]
pub struct ScopeViolation {
    pub kind: ViolationKind,
    pub path: String,
    pub rule: String,
}

/// Check `edits` against `scope`; the first violation wins.
///
/// The tests-not-needed rule is checked before avoid prefixes, so a test file inside a
/// forbidden area reports `tests-not-needed`.
pub fn validate_scope(edits: &[Edit], scope: &ScopeReflection) -> Option<ScopeViolation> {
    let prefixes = scope.avoid_prefixes();
    for edit in edits {
        let path = normalize_repo_path(edit.path());
        if path.is_empty() {
            continue;
        }
        if !scope.tests_needed && is_test_file_path(&path) {
            return Some(ScopeViolation {
                kind: ViolationKind::TestsNotNeeded,
                rule: "tests were judged unnecessary for this goal; do not create or edit test files"
                    .to_string(),
                path,
            });
        }
        if let Some(prefix) = prefixes.iter().find(|prefix| path.starts_with(prefix.as_str())) {
            return Some(ScopeViolation {
                kind: ViolationKind::ForbiddenArea,
                rule: format!("edits under `{}` are out of scope", prefix),
                path,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(path: &str) -> Edit {
        Edit::Upsert {
            path: path.to_string(),
            content: Some(String::new()),
        }
    }

    fn scope(must_avoid: &[&str], tests_needed: bool) -> ScopeReflection {
        ScopeReflection {
            must_avoid: must_avoid.iter().map(|s| s.to_string()).collect(),
            tests_needed,
            ..ScopeReflection::default()
        }
    }

    #[test]
    fn test_path_like_entries_become_prefixes() {
        let s = scope(&["src/legacy/", "./config/*.json", "README.md", "docs/**"], true);
        assert_eq!(
            s.avoid_prefixes(),
            vec!["src/legacy/", "config/", "README.md", "docs/"]
        );
    }

    #[test]
    fn test_free_text_entries_map_to_canonical_prefixes() {
        let s = scope(&["Do not touch the backend", "leave frontend styling alone"], true);
        assert_eq!(s.avoid_prefixes(), vec!["backend/", "frontend/"]);

        let s = scope(&["no test changes"], true);
        assert_eq!(s.avoid_prefixes().len(), KNOWN_TEST_DIRS.len());
    }

    #[test]
    fn test_forbidden_area_violation() {
        let s = scope(&["backend server code"], true);
        let violation = validate_scope(&[upsert("frontend/a.js"), upsert("backend/app.js")], &s)
            .expect("expected violation");
        assert_eq!(violation.kind, ViolationKind::ForbiddenArea);
        assert_eq!(violation.path, "backend/app.js");
    }

    #[test]
    fn test_tests_not_needed_takes_precedence_over_forbidden_area() {
        let s = scope(&["backend/"], false);
        let violation = validate_scope(&[upsert("backend/__tests__/a.test.js")], &s)
            .expect("expected violation");
        assert_eq!(violation.kind, ViolationKind::TestsNotNeeded);
        assert_eq!(violation.kind.as_str(), "tests-not-needed");
    }

    #[test]
    fn test_test_files_allowed_when_tests_needed() {
        let s = scope(&[], true);
        assert!(validate_scope(&[upsert("src/a.test.js")], &s).is_none());
    }

    #[test]
    fn test_exact_file_prefix_matches_only_that_file() {
        let s = scope(&["README.md"], true);
        assert!(validate_scope(&[upsert("README.md")], &s).is_some());
        assert!(validate_scope(&[upsert("docs/README.md")], &s).is_none());
    }

    #[test]
    fn test_is_test_file_path() {
        assert!(is_test_file_path("src/__tests__/thing.js"));
        assert!(is_test_file_path("__tests__/thing.js"));
        assert!(is_test_file_path("src/a.spec.ts"));
        assert!(is_test_file_path("src/a.test.jsx"));
        assert!(!is_test_file_path("src/testing.js"));
        assert!(!is_test_file_path("src/latest.js"));
    }

    #[test]
    fn test_scope_reflection_deserializes_camel_case_with_defaults() {
        let parsed: ScopeReflection = serde_json::from_str(
            r#"{"reasoning": "r", "mustChange": ["a.js"], "mustAvoid": [], "testsNeeded": false}"#,
        )
        .unwrap();
        assert_eq!(parsed.must_change, vec!["a.js"]);
        assert!(!parsed.tests_needed);
        assert!(parsed.must_have.is_empty());
        assert!(parsed.required_asset_paths.is_none());
    }
}
