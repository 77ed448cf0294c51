//! Goal phase state machine.
//!
//! A goal moves `planning → testing → implementing → verifying → ready`, or to `failed`
//! from anywhere. Every phase change is reported to the goal store, which may answer that
//! the goal no longer exists; that ends processing quietly with a skipped outcome.

use crate::apply::{ApplySummary, EditApplier, FileAppliedHook};
use crate::control::RunControl;
use crate::error::{StageError, StageKind};
use crate::reflect::ScopeReflector;
use crate::repair::RepairLadder;
use crate::stage::{StageOutcome, StageRunner, StageSettings};
use chrono::{DateTime, Utc};
use goalforge_adapters::branches::BranchStager;
use goalforge_adapters::config::Config;
use goalforge_adapters::files::FileStore;
use goalforge_adapters::goals::{GoalStore, GoalStoreError};
use goalforge_adapters::llm::LlmClient;
use goalforge_core::attempts::attempt_sequence;
use goalforge_core::goal::{Goal, GoalPhase};
use goalforge_core::scope::ScopeReflection;
use goalforge_core::snapshot::ProjectSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// The external services a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub files: Arc<dyn FileStore>,
    pub stager: Arc<dyn BranchStager>,
    pub llm: Arc<dyn LlmClient>,
    pub goals: Arc<dyn GoalStore>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub attempts: Vec<u32>,
    pub allow_empty_stage: bool,
    pub force_implementation: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stage_source: String,
    pub max_context_files: usize,
    pub max_context_file_chars: usize,
    pub pause_poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: attempt_sequence(&config.attempts),
            allow_empty_stage: config.allow_empty_stage,
            force_implementation: config.force_implementation,
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            stage_source: config.stage_source.clone(),
            max_context_files: config.max_context_files,
            max_context_file_chars: config.max_context_file_chars,
            pause_poll_interval: Duration::from_millis(config.pause_poll_interval_ms),
        }
    }

    fn stage_settings(&self) -> StageSettings {
        StageSettings {
            attempts: self.attempts.clone(),
            allow_empty_stage: self.allow_empty_stage,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_context_files: self.max_context_files,
            max_context_file_chars: self.max_context_file_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

/// What happened to one goal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalOutcome {
    pub goal_id: String,
    pub status: OutcomeStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub tests_attempt_succeeded: bool,
    pub edits_applied: usize,
    pub edits_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_overview: Option<Value>,
    pub finished_at: DateTime<Utc>,
}

impl GoalOutcome {
    fn new(goal_id: &str, status: OutcomeStatus) -> Self {
        Self {
            goal_id: goal_id.to_string(),
            status,
            success: status == OutcomeStatus::Completed,
            skipped_reason: None,
            message: None,
            tests_attempt_succeeded: false,
            edits_applied: 0,
            edits_skipped: 0,
            branch_overview: None,
            finished_at: Utc::now(),
        }
    }

    fn with_reason(mut self, reason: &str) -> Self {
        self.skipped_reason = Some(reason.to_string());
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_progress(mut self, progress: &Progress) -> Self {
        self.tests_attempt_succeeded = progress.tests_attempt_succeeded;
        self.edits_applied = progress.totals.applied;
        self.edits_skipped = progress.totals.skipped;
        self.branch_overview = progress.totals.overview.clone();
        self
    }
}

/// Why processing stopped early.
enum Interrupt {
    GoalMissing,
    Cancelled,
    Failed(String),
}

impl From<GoalStoreError> for Interrupt {
    fn from(err: GoalStoreError) -> Self {
        match err {
            GoalStoreError::NotFound { .. } => Interrupt::GoalMissing,
            GoalStoreError::Other(err) => {
                Interrupt::Failed(format!("Could not update goal: {}", err))
            }
        }
    }
}

impl Interrupt {
    fn from_stage(stage: StageKind, err: StageError) -> Self {
        match err {
            StageError::Cancelled => Interrupt::Cancelled,
            err => Interrupt::Failed(format!("The {} stage failed: {}", stage, err)),
        }
    }
}

#[derive(Default)]
struct Progress {
    totals: ApplySummary,
    tests_attempt_succeeded: bool,
    no_changes_required: bool,
    implementation_skipped: bool,
}

pub struct GoalPhaseController {
    collaborators: Collaborators,
    settings: EngineSettings,
    control: RunControl,
    on_file_applied: Option<FileAppliedHook>,
}

impl GoalPhaseController {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let control = RunControl::always_run();
        Self {
            collaborators,
            settings,
            control,
            on_file_applied: None,
        }
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_file_applied_hook(mut self, hook: FileAppliedHook) -> Self {
        self.on_file_applied = Some(hook);
        self
    }

    /// Process goals one after another, parents before children. Stops after a cancel.
    pub async fn process_goals(&self, project_id: &str, goals: &[Goal]) -> Vec<GoalOutcome> {
        let mut outcomes = Vec::with_capacity(goals.len());
        for goal in order_parents_first(goals) {
            let outcome = self.process_goal(project_id, goal).await;
            let cancelled = outcome.status == OutcomeStatus::Cancelled;
            outcomes.push(outcome);
            if cancelled {
                break;
            }
        }
        outcomes
    }

    pub async fn process_goal(&self, project_id: &str, goal: &Goal) -> GoalOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("goal", goal_id = %goal.id, run_id = %run_id);
        self.run_goal(project_id, goal).instrument(span).await
    }

    async fn run_goal(&self, project_id: &str, goal: &Goal) -> GoalOutcome {
        match goal.phase {
            GoalPhase::Ready => {
                return GoalOutcome::new(&goal.id, OutcomeStatus::Completed)
                    .with_reason("already-ready")
            }
            GoalPhase::Failed => {
                return GoalOutcome::new(&goal.id, OutcomeStatus::Skipped)
                    .with_reason("already-failed")
            }
            _ => {}
        }

        if let Some(intent) = goal.instruction_intent() {
            tracing::info!(
                reason = intent.skipped_reason(),
                "instruction-only goal; advancing without edits"
            );
            return match self.advance_through(goal, &goal.phase.remaining()).await {
                Ok(()) => GoalOutcome::new(&goal.id, OutcomeStatus::Completed)
                    .with_reason(intent.skipped_reason()),
                Err(interrupt) => self.interrupted(goal, interrupt, &Progress::default()).await,
            };
        }

        let mut progress = Progress::default();
        match self.drive(project_id, goal, &mut progress).await {
            Ok(()) => {
                let outcome =
                    GoalOutcome::new(&goal.id, OutcomeStatus::Completed).with_progress(&progress);
                tracing::info!(applied = progress.totals.applied, "goal ready");
                if progress.no_changes_required {
                    outcome.with_message(format!(
                        "No code changes required for: {}",
                        goal.prompt.trim()
                    ))
                } else {
                    outcome
                }
            }
            Err(interrupt) => self.interrupted(goal, interrupt, &progress).await,
        }
    }

    async fn drive(
        &self,
        project_id: &str,
        goal: &Goal,
        progress: &mut Progress,
    ) -> Result<(), Interrupt> {
        let c = &self.collaborators;
        self.checkpoint(StageKind::Testing).await?;
        if goal.phase > GoalPhase::Implementing {
            tracing::info!(phase = %goal.phase, "no stage left to run; finishing phases");
            return self.advance_through(goal, &[GoalPhase::Verifying, GoalPhase::Ready]).await;
        }

        let mut snapshot = self
            .load_snapshot(project_id)
            .await
            .map_err(|err| Interrupt::Failed(format!("Could not list project files: {}", err)))?;

        let (max_tokens, temperature) = (self.settings.max_tokens, self.settings.temperature);
        let reflector = ScopeReflector::new(c.llm.clone(), max_tokens, temperature);
        let mut scope = reflector.reflect(goal, &snapshot).await;
        if !scope.tests_needed && goal.has_failing_test_context() {
            tracing::info!("failing-test context present; forcing the testing stage");
            scope.force_tests_needed();
        }

        let runner = StageRunner::new(
            project_id,
            c.llm.clone(),
            c.files.clone(),
            self.settings.stage_settings(),
        );
        let repair = Arc::new(RepairLadder::new(c.llm.clone(), max_tokens, temperature));
        let applier = EditApplier::new(project_id, c.files.clone(), c.stager.clone())
            .with_repair(repair)
            .with_stage_source(self.settings.stage_source.clone())
            .with_file_applied_hook(self.on_file_applied.clone());

        // Testing.
        if goal.phase <= GoalPhase::Testing {
            self.checkpoint(StageKind::Testing).await?;
            self.advance_to(goal, GoalPhase::Testing).await?;
            if scope.tests_needed {
                let outcome = self
                    .run_stage(
                        StageKind::Testing,
                        goal,
                        &scope,
                        &mut snapshot,
                        &runner,
                        &applier,
                        progress,
                    )
                    .await?;
                progress.tests_attempt_succeeded = outcome == StageOutcome::Applied;
                self.refresh_snapshot(project_id, &mut snapshot).await;
                self.log_goal_counts(project_id, StageKind::Testing).await;
            } else {
                tracing::info!("tests not needed; skipping testing stage");
            }
        }

        // Implementing.
        if goal.phase <= GoalPhase::Implementing {
            self.checkpoint(StageKind::Implementation).await?;
            self.advance_to(goal, GoalPhase::Implementing).await?;
            let forced = self.settings.force_implementation || goal.force_implementation();
            if goal.is_coverage_remediation() && !forced {
                tracing::info!("coverage remediation goal; skipping implementation stage");
                progress.implementation_skipped = true;
            } else {
                self.refresh_snapshot(project_id, &mut snapshot).await;
                let outcome = self
                    .run_stage(
                        StageKind::Implementation,
                        goal,
                        &scope,
                        &mut snapshot,
                        &runner,
                        &applier,
                        progress,
                    )
                    .await?;
                progress.no_changes_required = outcome == StageOutcome::NoChangesRequired;
                self.log_goal_counts(project_id, StageKind::Implementation).await;
            }
        }

        let exempt = progress.no_changes_required
            || progress.implementation_skipped
            || self.settings.allow_empty_stage;
        if progress.totals.applied == 0 && !exempt {
            return Err(Interrupt::Failed(format!(
                "No edits were applied for: {}",
                goal.prompt.trim()
            )));
        }

        self.advance_through(goal, &[GoalPhase::Verifying, GoalPhase::Ready]).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        stage: StageKind,
        goal: &Goal,
        scope: &ScopeReflection,
        snapshot: &mut ProjectSnapshot,
        runner: &StageRunner,
        applier: &EditApplier,
        progress: &mut Progress,
    ) -> Result<StageOutcome, Interrupt> {
        let mut summary = ApplySummary::default();
        let result = runner
            .run(stage, goal, scope, snapshot, applier, &self.control, &mut summary)
            .await;
        progress.totals.absorb(&summary);
        tracing::info!(
            stage = %stage,
            applied = summary.applied,
            skipped = summary.skipped,
            "stage finished"
        );
        result.map_err(|err| Interrupt::from_stage(stage, err))
    }

    async fn checkpoint(&self, stage: StageKind) -> Result<(), Interrupt> {
        self.control
            .checkpoint()
            .await
            .map_err(|err| Interrupt::from_stage(stage, err))
    }

    async fn advance_to(&self, goal: &Goal, phase: GoalPhase) -> Result<(), Interrupt> {
        if goal.phase >= phase {
            return Ok(());
        }
        self.collaborators.goals.advance_phase(&goal.id, phase).await?;
        tracing::info!(phase = %phase, "phase advanced");
        Ok(())
    }

    async fn advance_through(&self, goal: &Goal, phases: &[GoalPhase]) -> Result<(), Interrupt> {
        for &phase in phases {
            self.advance_to(goal, phase).await?;
        }
        Ok(())
    }

    async fn interrupted(
        &self,
        goal: &Goal,
        interrupt: Interrupt,
        progress: &Progress,
    ) -> GoalOutcome {
        match interrupt {
            Interrupt::GoalMissing => {
                tracing::info!("goal no longer exists; skipping");
                GoalOutcome::new(&goal.id, OutcomeStatus::Skipped)
                    .with_reason("goal-not-found")
                    .with_progress(progress)
            }
            Interrupt::Cancelled => {
                tracing::info!("goal processing cancelled");
                GoalOutcome::new(&goal.id, OutcomeStatus::Cancelled)
                    .with_message("Goal processing was cancelled")
                    .with_progress(progress)
            }
            Interrupt::Failed(message) => {
                tracing::error!(error = %message, "goal failed");
                let goals = &self.collaborators.goals;
                if let Err(err) = goals.advance_phase(&goal.id, GoalPhase::Failed).await {
                    tracing::warn!(error = %err, "could not mark goal as failed");
                }
                GoalOutcome::new(&goal.id, OutcomeStatus::Failed)
                    .with_message(message)
                    .with_progress(progress)
            }
        }
    }

    async fn load_snapshot(&self, project_id: &str) -> anyhow::Result<ProjectSnapshot> {
        let listing = self.collaborators.files.list_project_files(project_id).await?;
        tracing::debug!(
            files = listing.files.len(),
            dirs = listing.dirs.len(),
            "project snapshot loaded"
        );
        Ok(ProjectSnapshot::from_paths(listing.files).with_dirs(listing.dirs))
    }

    async fn refresh_snapshot(&self, project_id: &str, snapshot: &mut ProjectSnapshot) {
        match self.load_snapshot(project_id).await {
            Ok(fresh) => *snapshot = fresh,
            Err(err) => tracing::warn!(error = %err, "snapshot refresh failed; keeping previous"),
        }
    }

    async fn log_goal_counts(&self, project_id: &str, after: StageKind) {
        match self.collaborators.goals.list_goals(project_id).await {
            Ok(goals) => {
                let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
                for goal in &goals {
                    *counts.entry(goal.phase.as_str()).or_default() += 1;
                }
                tracing::info!(
                    after = %after,
                    total = goals.len(),
                    counts = ?counts,
                    "project goal counts"
                );
            }
            Err(err) => tracing::debug!(error = %err, "could not fetch goal counts"),
        }
    }
}

/// Stable order in which every goal comes after its parent when both are in the list.
fn order_parents_first(goals: &[Goal]) -> Vec<&Goal> {
    let by_id: HashMap<&str, &Goal> = goals.iter().map(|g| (g.id.as_str(), g)).collect();
    let depth = |goal: &Goal| -> usize {
        let mut depth = 0usize;
        let mut current = goal;
        while let Some(parent) = current
            .parent_id
            .as_deref()
            .and_then(|id| by_id.get(id).copied())
        {
            depth += 1;
            if depth > goals.len() {
                break;
            }
            current = parent;
        }
        depth
    };
    let mut ordered: Vec<&Goal> = goals.iter().collect();
    ordered.sort_by_key(|goal| depth(*goal));
    ordered
}
