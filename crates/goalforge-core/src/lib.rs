//! Core domain model and contracts for goalforge.

pub mod attempts;
pub mod edits;
pub mod goal;
pub mod json_extract;
pub mod loose_json;
pub mod normalize;
pub mod replace;
pub mod scope;
pub mod snapshot;
pub mod util;

pub use attempts::{
    attempt_sequence, AttemptSpec, RetryContext, RetryKind, MAX_STAGE_ATTEMPTS,
};
pub use edits::{
    edits_from_value, normalize_repo_path, parse_edit_list, parse_json_response, Edit,
    EditParseError, ReplacementPair,
};
pub use goal::{classify_instruction, Goal, GoalPhase, InstructionIntent};
pub use replace::{resolve_replacements, ReplacementError};
pub use scope::{validate_scope, ScopeReflection, ScopeViolation, ViolationKind};
pub use snapshot::{PathResolution, ProjectSnapshot};
