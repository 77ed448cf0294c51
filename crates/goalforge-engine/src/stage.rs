//! The bounded attempt loop shared by the testing and implementation stages.

use crate::apply::{ApplySummary, EditApplier};
use crate::control::RunControl;
use crate::error::{StageError, StageKind};
use crate::prompts::{self, StagePromptContext};
use goalforge_adapters::files::FileStore;
use goalforge_adapters::llm::{GenerateRequest, LlmClient};
use goalforge_core::attempts::RetryContext;
use goalforge_core::edits::parse_edit_list;
use goalforge_core::goal::Goal;
use goalforge_core::scope::{validate_scope, ScopeReflection};
use goalforge_core::snapshot::ProjectSnapshot;
use goalforge_core::util::head_and_tail;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Edits were parsed, validated and handed to the applier.
    Applied,
    /// The final attempt returned no edits and empty stages are allowed.
    Empty,
    /// The implementation stage found nothing to change.
    NoChangesRequired,
}

/// Knobs for one stage run, derived from the engine settings.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub attempts: Vec<u32>,
    pub allow_empty_stage: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_context_files: usize,
    pub max_context_file_chars: usize,
}

pub struct StageRunner {
    project_id: String,
    llm: Arc<dyn LlmClient>,
    files: Arc<dyn FileStore>,
    settings: StageSettings,
}

impl StageRunner {
    pub fn new(
        project_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        files: Arc<dyn FileStore>,
        settings: StageSettings,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            llm,
            files,
            settings,
        }
    }

    /// Run `stage` over the attempt sequence. Failures before the final attempt feed a
    /// retry context into the next prompt; the final attempt's failure is returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        stage: StageKind,
        goal: &Goal,
        scope: &ScopeReflection,
        snapshot: &mut ProjectSnapshot,
        applier: &EditApplier,
        control: &RunControl,
        summary: &mut ApplySummary,
    ) -> Result<StageOutcome, StageError> {
        let attempts: &[u32] = if self.settings.attempts.is_empty() {
            &[1]
        } else {
            &self.settings.attempts
        };
        let last = attempts.len() - 1;
        let mut retry: Option<RetryContext> = None;

        for (position, &attempt) in attempts.iter().enumerate() {
            let is_final = position == last;
            control.checkpoint().await?;
            tracing::info!(stage = %stage, attempt, is_final, "stage attempt");

            let result = self
                .attempt(
                    stage,
                    goal,
                    scope,
                    snapshot,
                    applier,
                    control,
                    summary,
                    attempt,
                    is_final,
                    retry.as_ref(),
                )
                .await;
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if is_final || !err.is_retryable() => {
                    tracing::warn!(
                        stage = %stage,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "stage failed"
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        stage = %stage,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "attempt failed; retrying"
                    );
                    retry = Some(err.retry_context(snapshot));
                }
            }
        }
        // The loop always returns on its final element.
        Err(StageError::EmptyEdits { stage })
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        stage: StageKind,
        goal: &Goal,
        scope: &ScopeReflection,
        snapshot: &mut ProjectSnapshot,
        applier: &EditApplier,
        control: &RunControl,
        summary: &mut ApplySummary,
        attempt: u32,
        is_final: bool,
        retry: Option<&RetryContext>,
    ) -> Result<StageOutcome, StageError> {
        let files = self.context_files(scope, snapshot, retry, control).await?;
        let user = prompts::stage_user_prompt(&StagePromptContext {
            goal,
            stage,
            scope,
            snapshot,
            files: &files,
            retry,
            attempt,
            is_final,
        });
        let request = GenerateRequest::new(prompts::stage_system_prompt(stage, attempt), user)
            .with_limits(self.settings.max_tokens, self.settings.temperature);
        let response = self.llm.generate(request).await?;
        control.checkpoint().await?;

        let edits = parse_edit_list(&response)?;
        if edits.is_empty() {
            if is_final && stage == StageKind::Implementation && scope.must_change.is_empty() {
                tracing::info!("no code changes required");
                return Ok(StageOutcome::NoChangesRequired);
            }
            if is_final && self.settings.allow_empty_stage {
                tracing::warn!(stage = %stage, "stage produced no edits; allowed by configuration");
                return Ok(StageOutcome::Empty);
            }
            return Err(StageError::EmptyEdits { stage });
        }

        if let Some(violation) = validate_scope(&edits, scope) {
            return Err(violation.into());
        }

        applier
            .apply(stage, &goal.prompt, snapshot, &edits, control, summary)
            .await?;
        Ok(StageOutcome::Applied)
    }

    /// Bounded contents of the files the model should see: `mustChange`, required assets,
    /// then the path the previous failure was about.
    async fn context_files(
        &self,
        scope: &ScopeReflection,
        snapshot: &ProjectSnapshot,
        retry: Option<&RetryContext>,
        control: &RunControl,
    ) -> Result<Vec<(String, String)>, StageError> {
        let requested = scope
            .must_change
            .iter()
            .chain(scope.required_asset_paths.iter().flatten())
            .map(String::as_str)
            .chain(retry.map(|r| r.path.as_str()).filter(|p| !p.is_empty()));

        let mut files: Vec<(String, String)> = Vec::new();
        for raw in requested {
            if files.len() >= self.settings.max_context_files {
                break;
            }
            let Some(path) = snapshot.resolve(raw).target().map(str::to_string) else {
                continue;
            };
            if !snapshot.contains(&path) || files.iter().any(|(known, _)| *known == path) {
                continue;
            }
            control.checkpoint().await?;
            match self.files.read_file(&self.project_id, &path).await {
                Ok(Some(content)) => {
                    let bounded = head_and_tail(&content, self.settings.max_context_file_chars);
                    files.push((path, bounded));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(path = %path, error = %err, "could not read context file")
                }
            }
        }
        Ok(files)
    }
}
