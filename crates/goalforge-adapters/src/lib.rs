//! Runtime adapters for goalforge (config, logging, HTTP collaborators).

pub mod branches;
pub mod config;
pub mod files;
pub mod goals;
pub mod http;
pub mod llm;
pub mod logging;

pub use branches::{BranchStager, HttpBranchStager};
pub use config::{Config, ConfigError};
pub use files::{
    CreateOutcome, FileListing, FileOpError, FileOperation, FileStore, HttpFileStore,
    UpdateOutcome,
};
pub use goals::{GoalStore, GoalStoreError, HttpGoalStore};
pub use http::{ApiClient, RetryPolicy};
pub use llm::{GenerateRequest, HttpLlmClient, LlmClient, Message, Role};
