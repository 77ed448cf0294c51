//! Repair escalation ladder: targeted re-prompts, then full-file rewrites.
//!
//! The ladder is injected into the edit applier through [`ReplacementRepair`], so the text
//! resolver stays free of model calls.

use crate::control::RunControl;
use crate::error::{StageError, StageKind};
use crate::prompts;
use async_trait::async_trait;
use goalforge_adapters::llm::{GenerateRequest, LlmClient};
use goalforge_core::edits::{normalize_repo_path, parse_edit_list, Edit, ReplacementPair};
use goalforge_core::replace::{resolve_replacements, ReplacementError};
use goalforge_core::util::match_trailing_newline;
use std::sync::Arc;

const TARGETED_ROUNDS: u32 = 2;
const REWRITE_ROUNDS: u32 = 2;

/// A replacement that failed against the current content of one file.
pub struct RepairRequest<'a> {
    pub goal_prompt: &'a str,
    pub stage: StageKind,
    pub path: &'a str,
    pub content: &'a str,
    pub failed: &'a [ReplacementPair],
    pub error: &'a ReplacementError,
    pub control: &'a RunControl,
}

/// "Ask the model again" capability used when replacements cannot be resolved.
#[async_trait]
pub trait ReplacementRepair: Send + Sync {
    /// New full content for the file, or `None` when no usable candidate was produced.
    /// Fails only when the run is cancelled between rounds.
    async fn repair(&self, request: RepairRequest<'_>) -> Result<Option<String>, StageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Targeted,
    Rewrite,
}

enum RoundResult {
    Resolved(String),
    /// Nothing usable this round; move on.
    Unusable,
    /// The model call itself failed; stop escalating.
    Abort,
}

pub struct RepairLadder {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
}

impl RepairLadder {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            llm,
            max_tokens,
            temperature,
        }
    }

    async fn round(&self, tier: Tier, round: u32, request: &RepairRequest<'_>) -> RoundResult {
        let error = request.error.to_string();
        let (system, user) = match tier {
            Tier::Targeted => (
                prompts::repair_system_prompt(round),
                prompts::repair_user_prompt(
                    request.goal_prompt,
                    request.path,
                    request.content,
                    request.failed,
                    &error,
                    round,
                ),
            ),
            Tier::Rewrite => (
                prompts::rewrite_system_prompt(round),
                prompts::rewrite_user_prompt(
                    request.goal_prompt,
                    request.path,
                    request.content,
                    &error,
                    request.stage,
                    round,
                ),
            ),
        };
        let generate =
            GenerateRequest::new(system, user).with_limits(self.max_tokens, self.temperature);

        let response = match self.llm.generate(generate).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    path = request.path,
                    error = %err,
                    "repair call failed; abandoning ladder"
                );
                return RoundResult::Abort;
            }
        };

        let edits = match parse_edit_list(&response) {
            Ok(edits) => edits,
            Err(err) => {
                tracing::debug!(
                    path = request.path,
                    ?tier,
                    round,
                    error = %err,
                    "repair response unparsable"
                );
                return RoundResult::Unusable;
            }
        };

        let Some(candidate) = pick_candidate(&edits, request.path) else {
            return RoundResult::Unusable;
        };
        match (tier, candidate) {
            (_, Edit::Modify { replacements, .. }) if !replacements.is_empty() => {
                match resolve_replacements(request.content, replacements) {
                    Ok(updated) => RoundResult::Resolved(updated),
                    Err(err) => {
                        tracing::debug!(
                            path = request.path,
                            ?tier,
                            round,
                            error = %err,
                            "repaired replacements still do not resolve"
                        );
                        RoundResult::Unusable
                    }
                }
            }
            (Tier::Rewrite, Edit::Upsert { content: Some(content), .. }) => RoundResult::Resolved(
                match_trailing_newline(request.content, content.clone()),
            ),
            _ => RoundResult::Unusable,
        }
    }
}

/// The edit addressed to `path`, exactly or by a `/`-suffix. Edits for other files are
/// never used, even when they are the only one returned.
fn pick_candidate<'e>(edits: &'e [Edit], path: &str) -> Option<&'e Edit> {
    let target = normalize_repo_path(path);
    edits.iter().find(|edit| {
        let candidate = normalize_repo_path(edit.path());
        !candidate.is_empty()
            && (candidate == target || target.ends_with(&format!("/{}", candidate)))
    })
}

#[async_trait]
impl ReplacementRepair for RepairLadder {
    async fn repair(&self, request: RepairRequest<'_>) -> Result<Option<String>, StageError> {
        let tiers = [(Tier::Targeted, TARGETED_ROUNDS), (Tier::Rewrite, REWRITE_ROUNDS)];
        for (tier, rounds) in tiers {
            for round in 1..=rounds {
                request.control.checkpoint().await?;
                match self.round(tier, round, &request).await {
                    RoundResult::Resolved(updated) => {
                        tracing::info!(path = request.path, ?tier, round, "replacement repaired");
                        return Ok(Some(updated));
                    }
                    RoundResult::Unusable => continue,
                    RoundResult::Abort => return Ok(None),
                }
            }
        }
        tracing::warn!(path = request.path, "repair ladder exhausted");
        Ok(None)
    }
}
