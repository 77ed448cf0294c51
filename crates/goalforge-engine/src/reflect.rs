//! One model call per goal to agree the scope contract before any edits.

use crate::prompts;
use goalforge_adapters::llm::{GenerateRequest, LlmClient};
use goalforge_core::edits::parse_json_response;
use goalforge_core::goal::Goal;
use goalforge_core::scope::ScopeReflection;
use goalforge_core::snapshot::ProjectSnapshot;
use std::sync::Arc;

pub struct ScopeReflector {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
}

impl ScopeReflector {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            llm,
            max_tokens,
            temperature,
        }
    }

    /// Ask the model for the goal's scope. Any failure degrades to a permissive contract.
    pub async fn reflect(&self, goal: &Goal, snapshot: &ProjectSnapshot) -> ScopeReflection {
        let request = GenerateRequest::new(
            prompts::scope_system_prompt(),
            prompts::scope_user_prompt(goal, snapshot),
        )
        .with_limits(self.max_tokens, self.temperature);

        let response = match self.llm.generate(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "scope reflection call failed; using permissive scope"
                );
                return ScopeReflection::default();
            }
        };

        let value = match parse_json_response(&response) {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::warn!("scope reflection returned no JSON; using permissive scope");
                return ScopeReflection::default();
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "scope reflection JSON unreadable; using permissive scope"
                );
                return ScopeReflection::default();
            }
        };

        match serde_json::from_value::<ScopeReflection>(value) {
            Ok(scope) => {
                tracing::info!(
                    must_change = scope.must_change.len(),
                    must_avoid = scope.must_avoid.len(),
                    tests_needed = scope.tests_needed,
                    "scope reflection ready"
                );
                scope
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "scope reflection had the wrong shape; using permissive scope"
                );
                ScopeReflection::default()
            }
        }
    }
}
