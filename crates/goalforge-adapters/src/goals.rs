//! Goal storage collaborator.

use crate::http::ApiClient;
use async_trait::async_trait;
use goalforge_core::goal::{Goal, GoalPhase};
use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GoalStoreError {
    /// The goal was deleted or archived underneath us.
    #[error("Goal {goal_id} not found")]
    NotFound { goal_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GoalStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GoalStoreError::NotFound { .. })
    }
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn advance_phase(&self, goal_id: &str, phase: GoalPhase) -> Result<(), GoalStoreError>;

    async fn list_goals(&self, project_id: &str) -> Result<Vec<Goal>, GoalStoreError>;
}

#[derive(Debug, Clone)]
pub struct HttpGoalStore {
    api: ApiClient,
}

impl HttpGoalStore {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

/// Goals from a bare array or a `{goals: [...]}` envelope; undecodable entries are skipped.
fn goals_from_value(value: Value) -> Vec<Goal> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("goals") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Goal>(item) {
            Ok(goal) => Some(goal),
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable goal entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl GoalStore for HttpGoalStore {
    async fn advance_phase(&self, goal_id: &str, phase: GoalPhase) -> Result<(), GoalStoreError> {
        let url = self.api.endpoint(["goals", goal_id, "phase"])?;
        let response = self
            .api
            .post(url, &json!({ "phase": phase.as_str() }))
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(GoalStoreError::NotFound {
                goal_id: goal_id.to_string(),
            });
        }
        if !response.is_success() {
            return Err(response
                .error_for(&format!("Advancing goal {} to {}", goal_id, phase))
                .into());
        }
        Ok(())
    }

    async fn list_goals(&self, project_id: &str) -> Result<Vec<Goal>, GoalStoreError> {
        let mut url = self.api.endpoint(["goals"])?;
        url.query_pairs_mut().append_pair("projectId", project_id);
        let response = self.api.get(url).await?;
        if !response.is_success() {
            return Err(response.error_for("Listing goals").into());
        }
        Ok(goals_from_value(response.json::<Value>()?))
    }
}
