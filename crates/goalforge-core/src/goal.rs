//! Goal model, phase ordering and prompt/metadata classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════════
//  PHASES
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle phase of a goal. Declaration order is the happy-path order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalPhase {
    #[default]
    Planning,
    Testing,
    Implementing,
    Verifying,
    Ready,
    Failed,
}

impl GoalPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            GoalPhase::Planning => "planning",
            GoalPhase::Testing => "testing",
            GoalPhase::Implementing => "implementing",
            GoalPhase::Verifying => "verifying",
            GoalPhase::Ready => "ready",
            GoalPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GoalPhase::Ready | GoalPhase::Failed)
    }

    /// Successor on the happy path; `None` for terminal phases.
    pub fn next(self) -> Option<GoalPhase> {
        match self {
            GoalPhase::Planning => Some(GoalPhase::Testing),
            GoalPhase::Testing => Some(GoalPhase::Implementing),
            GoalPhase::Implementing => Some(GoalPhase::Verifying),
            GoalPhase::Verifying => Some(GoalPhase::Ready),
            GoalPhase::Ready | GoalPhase::Failed => None,
        }
    }

    /// Phases still to be advanced through, starting after `self` and ending at `Ready`.
    pub fn remaining(self) -> Vec<GoalPhase> {
        let mut phases = Vec::new();
        let mut current = self;
        while let Some(next) = current.next() {
            phases.push(next);
            current = next;
        }
        phases
    }
}

impl fmt::Display for GoalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  GOAL
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    #[serde(default, alias = "description")]
    pub prompt: String,
    #[serde(default, alias = "status")]
    pub phase: GoalPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Goal {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            phase: GoalPhase::Planning,
            parent_id: None,
            project_id: None,
            metadata: Map::new(),
        }
    }

    pub fn instruction_intent(&self) -> Option<InstructionIntent> {
        classify_instruction(&self.prompt)
    }

    /// Failing-test context from metadata or a "fix the failing test" style prompt.
    pub fn has_failing_test_context(&self) -> bool {
        let from_metadata = ["failingTests", "failingTestContext"]
            .iter()
            .any(|key| self.metadata.get(*key).is_some_and(is_present));
        from_metadata || prompt_mentions_failing_test(&self.prompt)
    }

    pub fn is_coverage_remediation(&self) -> bool {
        self.metadata_flag("coverageRemediation")
            || self
                .metadata
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("coverage"))
    }

    pub fn force_implementation(&self) -> bool {
        self.metadata_flag("forceImplementation")
    }

    fn metadata_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  PROMPT CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════

/// Goals that are pure workflow instructions and need no generated edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionIntent {
    BranchOnly,
    StageOnly,
    VerificationOnly,
}

impl InstructionIntent {
    /// Reason recorded on the outcome when the goal short-circuits.
    pub fn skipped_reason(self) -> &'static str {
        match self {
            InstructionIntent::BranchOnly => "branch-only",
            InstructionIntent::StageOnly => "stage-only",
            InstructionIntent::VerificationOnly => "verification-only",
        }
    }
}

const BRANCH_ONLY: &str = r"^(?:please\s+)?(?:create|make|open|start|set\s*up|check\s*out|switch\s+to)\s+(?:a\s+|the\s+)?(?:new\s+)?(?:feature\s+|working\s+|git\s+)?branch(?:\s+(?:named|called|for|from|off)\s+\S+(?:\s+\S+){0,5})?$";
const STAGE_ONLY: &str = r"^(?:please\s+)?stage\s+(?:all\s+)?(?:of\s+)?(?:the\s+|my\s+)?(?:changes|changed\s+files|files|edits|work)(?:\s+\S+){0,4}$";
const VERIFICATION_ONLY: &str = r"^(?:please\s+)?(?:verify|confirm|check|validate|review)\s+(?:that\s+)?(?:all\s+)?(?:of\s+)?(?:the\s+)?(?:changes|implementation|work|tests?|build|results?|everything)(?:\s+\S+){0,6}$";
const FAILING_TEST: &str =
    r"\b(?:fix|repair|resolve|address)(?:es|ed|ing)?\b.*\bfailing\s+(?:\w+\s+)?tests?\b";

fn instruction_patterns() -> &'static [(InstructionIntent, Regex)] {
    static PATTERNS: OnceLock<Vec<(InstructionIntent, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (InstructionIntent::BranchOnly, BRANCH_ONLY),
            (InstructionIntent::StageOnly, STAGE_ONLY),
            (InstructionIntent::VerificationOnly, VERIFICATION_ONLY),
        ]
        .into_iter()
        .filter_map(|(intent, pattern)| Regex::new(pattern).ok().map(|re| (intent, re)))
        .collect()
    })
}

fn failing_test_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(FAILING_TEST).ok()).as_ref()
}

fn canonical_prompt(prompt: &str) -> String {
    prompt
        .trim()
        .trim_end_matches(['.', '!', ';'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify prompts like "create a branch" or "stage the changes".
///
/// Compound requests ("create a branch and add a login page") are never instruction-only.
pub fn classify_instruction(prompt: &str) -> Option<InstructionIntent> {
    let canonical = canonical_prompt(prompt);
    if canonical.is_empty() || canonical.contains(" and ") || canonical.contains(" then ") {
        return None;
    }
    instruction_patterns()
        .iter()
        .find(|(_, re)| re.is_match(&canonical))
        .map(|(intent, _)| *intent)
}

pub fn prompt_mentions_failing_test(prompt: &str) -> bool {
    let canonical = canonical_prompt(prompt);
    failing_test_pattern().is_some_and(|re| re.is_match(&canonical))
}
