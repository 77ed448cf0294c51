//! Engine implementation and goal orchestration for goalforge.

pub mod apply;
pub mod control;
pub mod controller;
pub mod error;
pub mod prompts;
pub mod reflect;
pub mod repair;
pub mod stage;

#[cfg(test)]
mod testing;

pub use apply::{ApplySummary, EditApplier, FileAppliedHook};
pub use control::{ControlSignal, RunControl, RunFlags};
pub use controller::{
    Collaborators, EngineSettings, GoalOutcome, GoalPhaseController, OutcomeStatus,
};
pub use error::{StageError, StageKind};
pub use reflect::ScopeReflector;
pub use repair::{RepairLadder, RepairRequest, ReplacementRepair};
pub use stage::{StageOutcome, StageRunner, StageSettings};
