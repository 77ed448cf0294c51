//! In-memory fakes of the collaborator traits for engine tests.

use crate::prompts;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use goalforge_adapters::branches::BranchStager;
use goalforge_adapters::files::{CreateOutcome, FileListing, FileStore, UpdateOutcome};
use goalforge_adapters::goals::{GoalStore, GoalStoreError};
use goalforge_adapters::llm::{GenerateRequest, LlmClient};
use goalforge_core::goal::{Goal, GoalPhase};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;

const ROUTES: [&str; 5] = [
    prompts::SCOPE_REFLECTION_SYSTEM,
    prompts::TEST_STAGE_SYSTEM,
    prompts::IMPLEMENTATION_SYSTEM,
    prompts::REPAIR_SYSTEM,
    prompts::REWRITE_SYSTEM,
];

/// Model fake answering from per-prompt-kind queues; an empty queue is a transport error.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    queues: Mutex<BTreeMap<&'static str, VecDeque<String>>>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, route: &'static str, response: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(route)
            .or_default()
            .push_back(response.to_string());
    }

    pub fn push_scope(&self, response: &str) {
        self.push(prompts::SCOPE_REFLECTION_SYSTEM, response);
    }

    pub fn push_tests(&self, response: &str) {
        self.push(prompts::TEST_STAGE_SYSTEM, response);
    }

    pub fn push_implementation(&self, response: &str) {
        self.push(prompts::IMPLEMENTATION_SYSTEM, response);
    }

    pub fn push_repair(&self, response: &str) {
        self.push(prompts::REPAIR_SYSTEM, response);
    }

    pub fn push_rewrite(&self, response: &str) {
        self.push(prompts::REWRITE_SYSTEM, response);
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.system_prompt().starts_with(prefix))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// User prompts sent under the given system prompt prefix, in call order.
    pub fn user_prompts(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.system_prompt().starts_with(prefix))
            .map(|req| req.user_prompt().to_string())
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let route = ROUTES
            .iter()
            .copied()
            .find(|route| request.system_prompt().starts_with(route));
        self.calls.lock().unwrap().push(request);

        let route = route.ok_or_else(|| anyhow!("unrecognized system prompt"))?;
        self.queues
            .lock()
            .unwrap()
            .get_mut(route)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted response left"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileCall {
    Update(String),
    Create(String),
    Delete(String),
}

/// File store fake backed by a map; `create_conflicts` makes create report 409 for a path.
#[derive(Default)]
pub(crate) struct MemoryFileStore {
    files: Mutex<BTreeMap<String, String>>,
    create_conflicts: Mutex<HashSet<String>>,
    calls: Mutex<Vec<FileCall>>,
}

impl MemoryFileStore {
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::default();
        {
            let mut map = store.files.lock().unwrap();
            for (path, content) in files {
                map.insert(path.to_string(), content.to_string());
            }
        }
        store
    }

    /// Pretend `path` exists server-side even though listing and reads do not show it.
    pub fn conflict_on_create(&self, path: &str) {
        self.create_conflicts.lock().unwrap().insert(path.to_string());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn calls(&self) -> Vec<FileCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| !matches!(call, FileCall::Delete(_)))
            .count()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read_file(&self, _project_id: &str, path: &str) -> Result<Option<String>> {
        Ok(self.content(path))
    }

    async fn update_file(
        &self,
        _project_id: &str,
        path: &str,
        content: &str,
    ) -> Result<UpdateOutcome> {
        self.calls.lock().unwrap().push(FileCall::Update(path.to_string()));
        let mut files = self.files.lock().unwrap();
        let known =
            files.contains_key(path) || self.create_conflicts.lock().unwrap().contains(path);
        if !known {
            return Ok(UpdateOutcome::Missing);
        }
        files.insert(path.to_string(), content.to_string());
        Ok(UpdateOutcome::Updated)
    }

    async fn create_file(
        &self,
        _project_id: &str,
        path: &str,
        content: &str,
    ) -> Result<CreateOutcome> {
        self.calls.lock().unwrap().push(FileCall::Create(path.to_string()));
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) || self.create_conflicts.lock().unwrap().contains(path) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        files.insert(path.to_string(), content.to_string());
        Ok(CreateOutcome::Created)
    }

    async fn delete_path(&self, _project_id: &str, path: &str, recursive: bool) -> Result<()> {
        self.calls.lock().unwrap().push(FileCall::Delete(path.to_string()));
        let prefix = format!("{}/", path);
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| p != path && !(recursive && p.starts_with(&prefix)));
        Ok(())
    }

    async fn list_project_files(&self, _project_id: &str) -> Result<FileListing> {
        let files: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        let mut dirs = BTreeSet::new();
        for path in &files {
            let mut current = path.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                dirs.insert(parent.to_string());
                current = parent;
            }
        }
        Ok(FileListing {
            files,
            dirs: dirs.into_iter().collect(),
        })
    }
}

/// Branch stager fake that records every staged path and answers with a fixed overview.
#[derive(Default)]
pub(crate) struct RecordingStager {
    staged: Mutex<Vec<String>>,
    overview: Option<Value>,
}

impl RecordingStager {
    pub fn with_overview(overview: Value) -> Self {
        Self {
            staged: Mutex::new(Vec::new()),
            overview: Some(overview),
        }
    }

    pub fn staged(&self) -> Vec<String> {
        self.staged.lock().unwrap().clone()
    }
}

#[async_trait]
impl BranchStager for RecordingStager {
    async fn stage(&self, _project_id: &str, path: &str, _source: &str) -> Result<Option<Value>> {
        self.staged.lock().unwrap().push(path.to_string());
        Ok(self.overview.clone())
    }
}

/// Goal store fake recording phase advances; goals marked missing report not-found.
#[derive(Default)]
pub(crate) struct MemoryGoalStore {
    advances: Mutex<Vec<(String, GoalPhase)>>,
    missing: Mutex<HashSet<String>>,
}

impl MemoryGoalStore {
    pub fn mark_missing(&self, goal_id: &str) {
        self.missing.lock().unwrap().insert(goal_id.to_string());
    }

    pub fn advances(&self) -> Vec<(String, GoalPhase)> {
        self.advances.lock().unwrap().clone()
    }

    pub fn phases_for(&self, goal_id: &str) -> Vec<GoalPhase> {
        self.advances()
            .into_iter()
            .filter(|(id, _)| id == goal_id)
            .map(|(_, phase)| phase)
            .collect()
    }
}

#[async_trait]
impl GoalStore for MemoryGoalStore {
    async fn advance_phase(&self, goal_id: &str, phase: GoalPhase) -> Result<(), GoalStoreError> {
        if self.missing.lock().unwrap().contains(goal_id) {
            return Err(GoalStoreError::NotFound {
                goal_id: goal_id.to_string(),
            });
        }
        self.advances
            .lock()
            .unwrap()
            .push((goal_id.to_string(), phase));
        Ok(())
    }

    async fn list_goals(&self, _project_id: &str) -> Result<Vec<Goal>, GoalStoreError> {
        Ok(Vec::new())
    }
}
