// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

use crate::error::StageKind;
use goalforge_core::attempts::{RetryContext, RetryKind};
use goalforge_core::edits::ReplacementPair;
use goalforge_core::goal::Goal;
use goalforge_core::scope::ScopeReflection;
use goalforge_core::snapshot::ProjectSnapshot;
use goalforge_core::util::clip;

const MAX_TREE_PATHS: usize = 300;
const RETRY_DETAIL_CHARS: usize = 200;

/// Edit list wire schema shown to the model.
const EDIT_SCHEMA: &str = r#"OUTPUT (JSON object only):
{"edits": [
  {"type": "modify", "path": "relative/path.ext", "replacements": [{"search": "exact existing text", "replace": "new text"}]},
  {"type": "upsert", "path": "relative/path.ext", "content": "complete file content"},
  {"type": "delete", "path": "relative/path", "recursive": false}
]}"#;

const EDIT_RULES: &str = r#"EDIT RULES:
- `search` must match the current file content exactly once (include enough surrounding lines).
- `replace` is the exact replacement text.
- Preserve indentation and surrounding style.
- No placeholders, ellipses, or line numbers.
- Use `upsert` for new files, `modify` for targeted changes to existing files.
- Paths are relative to the repository root and use forward slashes."#;

const STRICT_JSON_RULES: &str = r#"STRICT OUTPUT:
- Respond with raw JSON only. No prose, no markdown fences, no comments.
- Every key and every string uses double quotes.
- No trailing commas."#;

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

pub const SCOPE_REFLECTION_SYSTEM: &str = r#"You are the goalforge scope planner. Before any code is written, decide the blast radius of a requested change.

OUTPUT (JSON object only):
{
  "reasoning": "one or two sentences",
  "mustChange": ["paths or areas that must be edited"],
  "mustAvoid": ["paths or areas that must not be touched"],
  "mustHave": ["observable behaviors the result must have"],
  "testsNeeded": true,
  "requiredAssetPaths": ["existing files the implementer needs to read"]
}

RULES:
- Prefer concrete repository paths from the file tree over prose.
- Set `testsNeeded` to false only for changes with no testable behavior (copy, config, docs).
- Keep `mustAvoid` to areas a careless edit would plausibly break."#;

pub const TEST_STAGE_SYSTEM: &str = r#"You are the goalforge test author. Write or update automated tests that pin down the requested behavior before it is implemented.

RULES:
- Only create or edit test files (`__tests__/`, `*.test.*`, `*.spec.*`).
- Follow the test framework and conventions already present in the repository.
- Tests should fail until the behavior exists and pass once it does."#;

pub const IMPLEMENTATION_SYSTEM: &str = r#"You are the goalforge implementer. Make the smallest set of source edits that delivers the requested behavior.

RULES:
- Stay inside the scope contract; never touch areas listed under MUST AVOID.
- Keep existing tests passing and satisfy any tests written for this goal.
- If the repository already does what was asked, return {"edits": []}."#;

pub const REPAIR_SYSTEM: &str = r#"You are the goalforge repair assistant. A search/replace edit could not be applied to the current file content. Return corrected `modify` replacements for that single file.

RULES:
- Copy every `search` verbatim from the CURRENT CONTENT block, with exact indentation.
- Each `search` must occur exactly once in the file.
- Return only the one file named in the request."#;

pub const REWRITE_SYSTEM: &str = r#"You are the goalforge rewrite assistant. Targeted edits to a file failed; produce the complete new content of that file.

RULES:
- Return one `upsert` edit containing the entire file, or a `modify` edit whose `search` text is copied verbatim.
- Keep everything unrelated to the requested change byte-for-byte identical.
- Return only the one file named in the request."#;

fn with_edit_contract(base: &str, strict: bool) -> String {
    let mut prompt = format!("{}\n\n{}\n\n{}", base, EDIT_SCHEMA, EDIT_RULES);
    if strict {
        prompt.push_str("\n\n");
        prompt.push_str(STRICT_JSON_RULES);
    }
    prompt
}

/// System prompt for a stage attempt; attempts after the first get strict JSON-only rules.
pub fn stage_system_prompt(stage: StageKind, attempt: u32) -> String {
    let base = match stage {
        StageKind::Testing => TEST_STAGE_SYSTEM,
        StageKind::Implementation => IMPLEMENTATION_SYSTEM,
    };
    with_edit_contract(base, attempt > 1)
}

pub fn repair_system_prompt(round: u32) -> String {
    with_edit_contract(REPAIR_SYSTEM, round > 1)
}

pub fn rewrite_system_prompt(round: u32) -> String {
    with_edit_contract(REWRITE_SYSTEM, round > 1)
}

pub fn scope_system_prompt() -> String {
    format!("{}\n\n{}", SCOPE_REFLECTION_SYSTEM, STRICT_JSON_RULES)
}

// ═══════════════════════════════════════════════════════════════════════════════
// USER PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

fn format_file_tree(snapshot: &ProjectSnapshot) -> String {
    if snapshot.is_empty() {
        return "(empty repository)".to_string();
    }
    let extra = snapshot.len().saturating_sub(MAX_TREE_PATHS);
    let mut lines: Vec<String> = snapshot
        .paths()
        .take(MAX_TREE_PATHS)
        .map(str::to_string)
        .collect();
    if extra > 0 {
        lines.push(format!("... and {} more files", extra));
    }
    lines.join("\n")
}

fn format_list(title: &str, items: &[String]) -> Option<String> {
    let items: Vec<String> = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| format!("- {}", item))
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(format!("{}:\n{}", title, items.join("\n")))
    }
}

fn format_scope(scope: &ScopeReflection) -> String {
    let mut sections = Vec::new();
    if !scope.reasoning.trim().is_empty() {
        sections.push(format!("REASONING: {}", scope.reasoning.trim()));
    }
    sections.extend(format_list("MUST CHANGE", &scope.must_change));
    sections.extend(format_list("MUST AVOID", &scope.must_avoid));
    sections.extend(format_list("MUST HAVE", &scope.must_have));
    sections.push(format!(
        "TESTS NEEDED: {}",
        if scope.tests_needed { "yes" } else { "no" }
    ));
    sections.join("\n")
}

fn format_file_block(path: &str, content: &str) -> String {
    format!("--- {} ---\n{}\n--- end {} ---", path, content, path)
}

pub fn scope_user_prompt(goal: &Goal, snapshot: &ProjectSnapshot) -> String {
    format!(
        "REQUEST:\n{}\n\nFILE TREE:\n{}",
        goal.prompt.trim(),
        format_file_tree(snapshot)
    )
}

/// Everything a stage attempt prompt is built from.
pub struct StagePromptContext<'a> {
    pub goal: &'a Goal,
    pub stage: StageKind,
    pub scope: &'a ScopeReflection,
    pub snapshot: &'a ProjectSnapshot,
    /// `(path, bounded content)` of files the model should see.
    pub files: &'a [(String, String)],
    pub retry: Option<&'a RetryContext>,
    pub attempt: u32,
    pub is_final: bool,
}

pub fn stage_user_prompt(ctx: &StagePromptContext<'_>) -> String {
    let mut prompt = format!(
        "REQUEST:\n{}\n\nSTAGE: {} (attempt {})\n\nSCOPE CONTRACT:\n{}\n\nFILE TREE:\n{}",
        ctx.goal.prompt.trim(),
        ctx.stage,
        ctx.attempt,
        format_scope(ctx.scope),
        format_file_tree(ctx.snapshot)
    );

    if !ctx.files.is_empty() {
        prompt.push_str("\n\nCURRENT FILES:\n");
        let blocks: Vec<String> = ctx
            .files
            .iter()
            .map(|(path, content)| format_file_block(path, content))
            .collect();
        prompt.push_str(&blocks.join("\n\n"));
    }

    if let Some(retry) = ctx.retry {
        prompt.push_str(&format_retry_notice(retry));
    }

    if ctx.is_final {
        prompt.push_str("\n\nThis is the final attempt. Return valid JSON that applies cleanly.");
    }
    prompt
}

/// Corrective notice appended to the next attempt after a failure.
pub fn format_retry_notice(retry: &RetryContext) -> String {
    let rules: &[&str] = match retry.kind {
        RetryKind::Scope => &[
            "Your edits left the agreed scope and were rejected before anything was applied.",
            "Return edits only for paths the scope contract allows.",
        ],
        RetryKind::Parse => &[
            "Your previous response was not valid JSON.",
            "Respond with a single JSON object and nothing else.",
        ],
        RetryKind::EmptyEdits => &[
            "Your response did not include any edits.",
            "Return at least one edit that moves the request forward.",
        ],
        RetryKind::SearchAmbiguous => &[
            "Your `search` text matched multiple places.",
            "Include 3-10 surrounding lines and at least one unique identifier.",
        ],
        RetryKind::MissingFile => &[
            "The file you referenced does not exist.",
            "Use one of the existing paths below, or `upsert` to create a new file.",
        ],
        RetryKind::SearchNotFound => &[
            "Your `search` text does not exist verbatim in the file.",
            "Copy it exactly from the current content, including indentation.",
        ],
        RetryKind::Other => &["Fix the problem described above and return corrected edits."],
    };
    let mut bullets: Vec<String> = rules.iter().map(|rule| rule.to_string()).collect();
    if let Some(rule) = &retry.scope_warning {
        bullets.insert(1.min(bullets.len()), format!("Rule: {}", rule));
    }

    let mut notice = format!(
        "\n\nIMPORTANT: Your previous attempt failed.\nError:\n{}\n\nRules for this attempt:\n{}",
        retry.message,
        bullets
            .into_iter()
            .map(|b| format!("- {}", b))
            .collect::<Vec<_>>()
            .join("\n")
    );
    if !retry.path.is_empty() {
        notice.push_str(&format!("\nPath involved: {}", retry.path));
    }
    if let Some(paths) = &retry.suggested_paths {
        let listed: Vec<String> = paths.iter().map(|p| format!("- {}", p)).collect();
        notice.push_str(&format!(
            "\nExisting paths that may be what you meant:\n{}",
            listed.join("\n")
        ));
    }
    if let Some(snippet) = &retry.search_snippet {
        notice.push_str(&format!(
            "\nPrevious attempt detail:\n{}",
            clip(snippet, RETRY_DETAIL_CHARS)
        ));
    }
    notice
}

pub fn repair_user_prompt(
    goal_prompt: &str,
    path: &str,
    content: &str,
    failed: &[ReplacementPair],
    error: &str,
    round: u32,
) -> String {
    let failed_json = serde_json::to_string_pretty(failed).unwrap_or_default();
    let mut prompt = format!(
        "REQUEST:\n{}\n\nFILE: {}\n\nCURRENT CONTENT:\n{}\n\nFAILED REPLACEMENTS:\n{}\n\nERROR:\n{}\n\nReturn {{\"edits\": [{{\"type\": \"modify\", \"path\": \"{}\", \"replacements\": [...]}}]}} with corrected replacements.",
        goal_prompt.trim(),
        path,
        format_file_block(path, content),
        failed_json,
        error,
        path
    );
    if round > 1 {
        prompt.push_str("\nThis is the last targeted attempt: raw JSON only.");
    }
    prompt
}

pub fn rewrite_user_prompt(
    goal_prompt: &str,
    path: &str,
    content: &str,
    error: &str,
    stage: StageKind,
    round: u32,
) -> String {
    let demand = if stage == StageKind::Testing && round == 1 {
        format!(
            "Return exactly {{\"edits\": [{{\"type\": \"upsert\", \"path\": \"{}\", \"content\": \"...\"}}]}} with the complete test file.",
            path
        )
    } else {
        format!(
            "Return one edit for {}: a complete `upsert`, or a `modify` whose search text is copied verbatim.",
            path
        )
    };
    format!(
        "REQUEST:\n{}\n\nFILE: {}\n\nCURRENT CONTENT:\n{}\n\nTARGETED EDITS FAILED WITH:\n{}\n\n{}",
        goal_prompt.trim(),
        path,
        format_file_block(path, content),
        error,
        demand
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_attempts_are_stricter() {
        let first = stage_system_prompt(StageKind::Testing, 1);
        let second = stage_system_prompt(StageKind::Testing, 2);
        assert!(first.starts_with(TEST_STAGE_SYSTEM));
        assert!(!first.contains("STRICT OUTPUT"));
        assert!(second.contains("STRICT OUTPUT"));
        let implementation = stage_system_prompt(StageKind::Implementation, 1);
        assert!(implementation.starts_with(IMPLEMENTATION_SYSTEM));
    }

    #[test]
    fn test_retry_notice_for_missing_file_lists_suggestions() {
        let retry = RetryContext::new(RetryKind::MissingFile, "File not found: src/Login.jsx")
            .with_path("src/Login.jsx")
            .with_suggested_paths(vec!["src/components/Login.jsx".to_string()]);
        let notice = format_retry_notice(&retry);
        assert!(notice.contains("does not exist"));
        assert!(notice.contains("- src/components/Login.jsx"));
        assert!(notice.contains("Path involved: src/Login.jsx"));
    }

    #[test]
    fn test_retry_notice_for_scope_violation_names_rule() {
        let retry = RetryContext::new(
            RetryKind::Scope,
            "Scope violation (forbidden-area) for backend/a.js: x",
        )
        .with_scope_warning("edits under `backend/` are out of scope");
        let notice = format_retry_notice(&retry);
        assert!(notice.contains("Rule: edits under `backend/` are out of scope"));
        assert!(notice.contains("left the agreed scope"));
    }

    #[test]
    fn test_retry_notice_follows_kind_not_message_text() {
        let retry = RetryContext::new(
            RetryKind::SearchNotFound,
            "Replacement 1: search text not found. Searched for: \"two matches\"",
        );
        let notice = format_retry_notice(&retry);
        assert!(notice.contains("does not exist verbatim"));
        assert!(!notice.contains("matched multiple places"));
    }

    #[test]
    fn test_stage_user_prompt_includes_context() {
        let goal = Goal::new("g1", "Add a logout button");
        let scope = ScopeReflection {
            must_change: vec!["src/Header.jsx".to_string()],
            must_avoid: vec!["backend/".to_string()],
            ..ScopeReflection::default()
        };
        let snapshot = ProjectSnapshot::from_paths(["src/Header.jsx"]);
        let files = vec![("src/Header.jsx".to_string(), "export {}\n".to_string())];
        let retry =
            RetryContext::new(RetryKind::EmptyEdits, "The implementation stage produced no edits");
        let prompt = stage_user_prompt(&StagePromptContext {
            goal: &goal,
            stage: StageKind::Implementation,
            scope: &scope,
            snapshot: &snapshot,
            files: &files,
            retry: Some(&retry),
            attempt: 2,
            is_final: true,
        });
        assert!(prompt.contains("Add a logout button"));
        assert!(prompt.contains("MUST AVOID:\n- backend/"));
        assert!(prompt.contains("--- src/Header.jsx ---"));
        assert!(prompt.contains("did not include any edits"));
        assert!(prompt.contains("final attempt"));
    }

    #[test]
    fn test_testing_rewrite_demands_upsert_first() {
        let first = rewrite_user_prompt("g", "a.test.js", "x", "err", StageKind::Testing, 1);
        let second = rewrite_user_prompt("g", "a.test.js", "x", "err", StageKind::Testing, 2);
        assert!(first.contains("Return exactly"));
        assert!(!second.contains("Return exactly"));
    }
}
