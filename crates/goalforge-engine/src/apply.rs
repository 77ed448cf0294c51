//! Applies a validated edit batch through the file collaborator, one edit at a time.

use crate::control::RunControl;
use crate::error::{StageError, StageKind};
use crate::repair::{RepairRequest, ReplacementRepair};
use goalforge_adapters::branches::BranchStager;
use goalforge_adapters::files::{
    CreateOutcome, FileOpError, FileOperation, FileStore, UpdateOutcome,
};
use goalforge_core::edits::Edit;
use goalforge_core::replace::resolve_replacements;
use goalforge_core::snapshot::{PathResolution, ProjectSnapshot};
use serde_json::Value;
use std::sync::Arc;

/// Invoked with the repo path of every applied write or delete.
pub type FileAppliedHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplySummary {
    pub applied: usize,
    pub skipped: usize,
    pub applied_paths: Vec<String>,
    /// Latest branch overview returned by staging, if any.
    pub overview: Option<Value>,
}

impl ApplySummary {
    pub fn absorb(&mut self, other: &ApplySummary) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.applied_paths.extend(other.applied_paths.iter().cloned());
        if other.overview.is_some() {
            self.overview = other.overview.clone();
        }
    }

    fn skip(&mut self, path: &str, reason: &str) {
        tracing::info!(path, reason, "edit skipped");
        self.skipped += 1;
    }
}

pub struct EditApplier {
    project_id: String,
    files: Arc<dyn FileStore>,
    stager: Arc<dyn BranchStager>,
    repair: Option<Arc<dyn ReplacementRepair>>,
    stage_source: String,
    on_file_applied: Option<FileAppliedHook>,
}

impl EditApplier {
    pub fn new(
        project_id: impl Into<String>,
        files: Arc<dyn FileStore>,
        stager: Arc<dyn BranchStager>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            files,
            stager,
            repair: None,
            stage_source: "ai".to_string(),
            on_file_applied: None,
        }
    }

    pub fn with_repair(mut self, repair: Arc<dyn ReplacementRepair>) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_stage_source(mut self, source: impl Into<String>) -> Self {
        self.stage_source = source.into();
        self
    }

    pub fn with_file_applied_hook(mut self, hook: Option<FileAppliedHook>) -> Self {
        self.on_file_applied = hook;
        self
    }

    /// Apply `edits` in order, accumulating into `summary`.
    ///
    /// Edits applied before a failing one stay applied (and staged); the snapshot reflects
    /// them either way.
    pub async fn apply(
        &self,
        stage: StageKind,
        goal_prompt: &str,
        snapshot: &mut ProjectSnapshot,
        edits: &[Edit],
        control: &RunControl,
        summary: &mut ApplySummary,
    ) -> Result<(), StageError> {
        for edit in edits {
            control.checkpoint().await?;
            match edit {
                Edit::Modify { path, replacements } => {
                    let Some(target) = resolve_existing(snapshot, path, summary) else {
                        continue;
                    };
                    let current = self
                        .files
                        .read_file(&self.project_id, &target)
                        .await?
                        .ok_or_else(|| StageError::FileNotFound {
                            path: target.clone(),
                        })?;

                    let updated = match resolve_replacements(&current, replacements) {
                        Ok(updated) => updated,
                        Err(source) => {
                            let repaired = match &self.repair {
                                Some(repair) => {
                                    repair
                                        .repair(RepairRequest {
                                            goal_prompt,
                                            stage,
                                            path: &target,
                                            content: &current,
                                            failed: replacements,
                                            error: &source,
                                            control,
                                        })
                                        .await?
                                }
                                None => None,
                            };
                            repaired.ok_or(StageError::Replacement {
                                path: target.clone(),
                                source,
                            })?
                        }
                    };

                    if updated == current {
                        summary.skip(&target, "no-op");
                        continue;
                    }
                    self.write(snapshot, &target, &updated).await?;
                    self.after_applied(snapshot, &target, false, summary).await?;
                }
                Edit::Upsert { path, content } => {
                    if path.is_empty() {
                        summary.skip(path, "empty path");
                        continue;
                    }
                    let Some(content) = content else {
                        summary.skip(path, "non-string content");
                        continue;
                    };
                    self.write(snapshot, path, content).await?;
                    self.after_applied(snapshot, path, false, summary).await?;
                }
                Edit::Delete { path, recursive } => {
                    let Some(target) = resolve_existing(snapshot, path, summary) else {
                        continue;
                    };
                    self.files
                        .delete_path(&self.project_id, &target, *recursive)
                        .await?;
                    self.after_applied(snapshot, &target, true, summary).await?;
                }
            }
        }
        Ok(())
    }

    /// Known paths go through update first, unknown paths through create first; each falls
    /// back to the other when the server disagrees about existence.
    async fn write(
        &self,
        snapshot: &ProjectSnapshot,
        path: &str,
        content: &str,
    ) -> Result<(), StageError> {
        let files = &self.files;
        let project = self.project_id.as_str();
        if snapshot.contains(path) {
            if files.update_file(project, path, content).await? == UpdateOutcome::Updated {
                return Ok(());
            }
            tracing::debug!(path, "known path missing on server; creating");
            match files.create_file(project, path, content).await? {
                CreateOutcome::Created => Ok(()),
                CreateOutcome::AlreadyExists => Err(conflict(path, FileOperation::Create, 409)),
            }
        } else {
            if files.create_file(project, path, content).await? == CreateOutcome::Created {
                return Ok(());
            }
            tracing::debug!(path, "path already exists on server; updating");
            match files.update_file(project, path, content).await? {
                UpdateOutcome::Updated => Ok(()),
                UpdateOutcome::Missing => Err(conflict(path, FileOperation::Update, 404)),
            }
        }
    }

    async fn after_applied(
        &self,
        snapshot: &mut ProjectSnapshot,
        path: &str,
        deleted: bool,
        summary: &mut ApplySummary,
    ) -> Result<(), StageError> {
        if deleted {
            snapshot.record_delete(path);
        } else {
            snapshot.record_write(path);
        }

        let overview = self
            .stager
            .stage(&self.project_id, path, &self.stage_source)
            .await?;
        if overview.is_some() {
            summary.overview = overview;
        }
        if let Some(hook) = &self.on_file_applied {
            hook(path);
        }

        tracing::info!(path, deleted, "edit applied");
        summary.applied += 1;
        summary.applied_paths.push(path.to_string());
        Ok(())
    }
}

/// Resolve a path that must refer to one existing file. Unknown paths pass through so the
/// read reports a proper not-found.
fn resolve_existing(
    snapshot: &ProjectSnapshot,
    raw: &str,
    summary: &mut ApplySummary,
) -> Option<String> {
    match snapshot.resolve(raw) {
        PathResolution::Exact(path) | PathResolution::Unknown(path) => Some(path),
        PathResolution::Suffix(path) => {
            tracing::debug!(requested = raw, resolved = %path, "resolved edit path by suffix");
            Some(path)
        }
        PathResolution::Ambiguous(candidates) => {
            tracing::warn!(path = raw, candidates = ?candidates, "ambiguous edit path");
            summary.skip(raw, "ambiguous path");
            None
        }
        PathResolution::Empty => {
            summary.skip(raw, "empty path");
            None
        }
    }
}

fn conflict(path: &str, operation: FileOperation, status: u16) -> StageError {
    StageError::FileOp(FileOpError {
        path: path.to_string(),
        status,
        operation,
        detail: "server disagreed about whether the file exists".to_string(),
    })
}
