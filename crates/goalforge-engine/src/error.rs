//! Stage failure taxonomy and the retry hints derived from it.

use goalforge_adapters::files::FileOpError;
use goalforge_core::attempts::{RetryContext, RetryKind};
use goalforge_core::edits::EditParseError;
use goalforge_core::goal::GoalPhase;
use goalforge_core::replace::ReplacementError;
use goalforge_core::scope::ScopeViolation;
use goalforge_core::snapshot::ProjectSnapshot;
use std::fmt;
use thiserror::Error;

const SUGGESTION_LIMIT: usize = 5;

/// The two edit-producing stages of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Testing,
    Implementation,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Testing => "testing",
            StageKind::Implementation => "implementation",
        }
    }

    pub fn phase(self) -> GoalPhase {
        match self {
            StageKind::Testing => GoalPhase::Testing,
            StageKind::Implementation => GoalPhase::Implementing,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Parse(#[from] EditParseError),

    #[error("Could not apply edit to {path}: {source}")]
    Replacement {
        path: String,
        source: ReplacementError,
    },

    #[error(transparent)]
    Scope(#[from] ScopeViolation),

    #[error("The {stage} stage produced no edits")]
    EmptyEdits { stage: StageKind },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error(transparent)]
    FileOp(#[from] FileOpError),

    #[error("Goal processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<FileOpError>() {
            Ok(op) => StageError::FileOp(op),
            Err(err) => StageError::Other(err),
        }
    }
}

impl StageError {
    /// Whether another attempt with a corrective prompt can fix this.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StageError::Cancelled | StageError::Other(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Parse(_) => "parse",
            StageError::Replacement { .. } => "replacement",
            StageError::Scope(_) => "scope",
            StageError::EmptyEdits { .. } => "empty-edits",
            StageError::FileNotFound { .. } => "file-not-found",
            StageError::FileOp(_) => "file-op",
            StageError::Cancelled => "cancelled",
            StageError::Other(_) => "other",
        }
    }

    /// Hints for the next attempt's prompt.
    pub fn retry_context(&self, snapshot: &ProjectSnapshot) -> RetryContext {
        let context = RetryContext::new(self.retry_kind(), self.to_string());
        match self {
            StageError::Parse(err) => context.with_search_snippet(err.excerpt.clone()),
            StageError::Replacement { path, source } => context
                .with_path(path.clone())
                .with_search_snippet(source.snippet()),
            StageError::Scope(violation) => context
                .with_path(violation.path.clone())
                .with_scope_warning(violation.rule.clone()),
            StageError::FileNotFound { path } => context
                .with_path(path.clone())
                .with_suggested_paths(snapshot.suggest(path, SUGGESTION_LIMIT)),
            StageError::FileOp(op) => context
                .with_path(op.path.clone())
                .with_suggested_paths(snapshot.suggest(&op.path, SUGGESTION_LIMIT)),
            StageError::EmptyEdits { .. } | StageError::Cancelled | StageError::Other(_) => context,
        }
    }

    fn retry_kind(&self) -> RetryKind {
        match self {
            StageError::Parse(_) => RetryKind::Parse,
            StageError::Replacement {
                source: ReplacementError::Ambiguous { .. },
                ..
            } => RetryKind::SearchAmbiguous,
            StageError::Replacement { .. } => RetryKind::SearchNotFound,
            StageError::Scope(_) => RetryKind::Scope,
            StageError::EmptyEdits { .. } => RetryKind::EmptyEdits,
            StageError::FileNotFound { .. } => RetryKind::MissingFile,
            StageError::FileOp(op) if op.status == 404 => RetryKind::MissingFile,
            StageError::FileOp(_) | StageError::Cancelled | StageError::Other(_) => {
                RetryKind::Other
            }
        }
    }
}
