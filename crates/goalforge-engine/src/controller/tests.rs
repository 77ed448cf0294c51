use super::*;
use crate::control::{ControlSignal, RunFlags};
use crate::prompts;
use crate::testing::{MemoryFileStore, MemoryGoalStore, RecordingStager, ScriptedLlm};
use serde_json::json;
use std::sync::Mutex;

struct Fixture {
    llm: Arc<ScriptedLlm>,
    files: Arc<MemoryFileStore>,
    stager: Arc<RecordingStager>,
    goals: Arc<MemoryGoalStore>,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            llm: Arc::new(ScriptedLlm::new()),
            files: Arc::new(MemoryFileStore::with_files(files.iter().copied())),
            stager: Arc::new(RecordingStager::with_overview(json!({"changedFiles": 1}))),
            goals: Arc::new(MemoryGoalStore::default()),
        }
    }

    fn controller(&self, settings: EngineSettings) -> GoalPhaseController {
        GoalPhaseController::new(
            Collaborators {
                files: self.files.clone(),
                stager: self.stager.clone(),
                llm: self.llm.clone(),
                goals: self.goals.clone(),
            },
            settings,
        )
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        attempts: vec![1, 2],
        ..EngineSettings::default()
    }
}

fn modify(path: &str, search: &str, replace: &str) -> String {
    let replacement = json!({"search": search, "replace": replace});
    json!({"edits": [{"type": "modify", "path": path, "replacements": [replacement]}]}).to_string()
}

const ALL_PHASES: [GoalPhase; 4] = [
    GoalPhase::Testing,
    GoalPhase::Implementing,
    GoalPhase::Verifying,
    GoalPhase::Ready,
];

#[tokio::test]
async fn branch_only_goal_advances_without_model_calls() {
    let fx = Fixture::new(&[("src/a.js", "x")]);
    let goal = Goal::new("g1", "Create a branch.");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.success);
    assert_eq!(outcome.skipped_reason.as_deref(), Some("branch-only"));
    assert_eq!(fx.goals.phases_for("g1"), ALL_PHASES.to_vec());
    assert_eq!(fx.llm.total_calls(), 0);
    assert!(fx.files.calls().is_empty());
}

#[tokio::test]
async fn parse_failure_then_test_edit_succeeds() {
    let fx = Fixture::new(&[
        ("src/a.js", "export const v = 1;\n"),
        ("src/a.test.js", "expect(X)\n"),
    ]);
    fx.llm.push_scope(r#"{"mustChange": ["src/a.js"], "mustAvoid": [], "testsNeeded": true}"#);
    fx.llm.push_tests("{\"edits\": [oops]}");
    fx.llm.push_tests(&modify("src/a.test.js", "X", "Y"));
    fx.llm.push_implementation(&modify("src/a.js", "1", "2"));
    let goal = Goal::new("g1", "Bump the exported value");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed, "{:?}", outcome.message);
    assert!(outcome.tests_attempt_succeeded);
    assert_eq!(outcome.edits_applied, 2);
    assert_eq!(outcome.branch_overview, Some(json!({"changedFiles": 1})));
    assert_eq!(fx.files.content("src/a.test.js").as_deref(), Some("expect(Y)\n"));
    assert_eq!(fx.files.content("src/a.js").as_deref(), Some("export const v = 2;\n"));
    assert_eq!(fx.stager.staged(), vec!["src/a.test.js", "src/a.js"]);
    assert_eq!(fx.goals.phases_for("g1"), ALL_PHASES.to_vec());

    let test_prompts = fx.llm.user_prompts(prompts::TEST_STAGE_SYSTEM);
    assert_eq!(test_prompts.len(), 2);
    assert!(test_prompts[1].contains("not valid JSON"));
}

#[tokio::test]
async fn empty_implementation_with_no_must_change_needs_no_changes() {
    let fx = Fixture::new(&[("README.md", "# Demo\n")]);
    fx.llm.push_scope(r#"{"mustChange": [], "mustAvoid": [], "testsNeeded": false}"#);
    fx.llm.push_implementation(r#"{"edits": []}"#);
    fx.llm.push_implementation(r#"{"edits": []}"#);
    let goal = Goal::new("g1", "Tidy the README wording");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(
        outcome.message.as_deref(),
        Some("No code changes required for: Tidy the README wording")
    );
    assert_eq!(outcome.edits_applied, 0);
    assert_eq!(fx.llm.calls_matching(prompts::TEST_STAGE_SYSTEM), 0);
    assert_eq!(fx.goals.phases_for("g1"), ALL_PHASES.to_vec());
}

#[tokio::test]
async fn missing_goal_is_skipped() {
    let fx = Fixture::new(&[]);
    fx.goals.mark_missing("g1");
    fx.llm.push_scope(r#"{"testsNeeded": false}"#);
    let goal = Goal::new("g1", "Add a footer");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Skipped);
    assert!(!outcome.success);
    assert_eq!(outcome.skipped_reason.as_deref(), Some("goal-not-found"));
    assert!(outcome.message.is_none());
    assert!(fx.goals.advances().is_empty());
}

#[tokio::test]
async fn zero_applied_edits_fail_the_goal() {
    let fx = Fixture::new(&[("src/a.js", "same\n")]);
    fx.llm.push_scope(r#"{"mustChange": ["src/a.js"], "testsNeeded": false}"#);
    fx.llm.push_implementation(&modify("src/a.js", "same", "same"));
    let goal = Goal::new("g1", "Make it better");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.edits_skipped, 1);
    assert_eq!(
        outcome.message.as_deref(),
        Some("No edits were applied for: Make it better")
    );
    assert_eq!(fx.goals.phases_for("g1").last(), Some(&GoalPhase::Failed));
}

#[tokio::test]
async fn final_stage_failure_marks_goal_failed() {
    let fx = Fixture::new(&[]);
    fx.llm.push_scope(r#"{"testsNeeded": true}"#);
    fx.llm.push_tests("{\"edits\": [oops]}");
    fx.llm.push_tests("{\"edits\": [still, oops]}");
    let goal = Goal::new("g1", "Add a login page");

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    let message = outcome.message.unwrap_or_default();
    assert!(message.starts_with("The testing stage failed"), "{}", message);
    assert!(message.contains("malformed JSON"));
    assert_eq!(
        fx.goals.phases_for("g1"),
        vec![GoalPhase::Testing, GoalPhase::Failed]
    );
    assert_eq!(fx.llm.calls_matching(prompts::IMPLEMENTATION_SYSTEM), 0);
}

#[tokio::test]
async fn cancel_stops_the_run_without_calls() {
    let fx = Fixture::new(&[]);
    let flags = RunFlags::default();
    flags.cancel();
    let controller = fx
        .controller(settings())
        .with_control(RunControl::from_flags(flags, Duration::from_millis(1)));
    let goals = vec![Goal::new("g1", "Add a footer"), Goal::new("g2", "Add a header")];

    let outcomes = controller.process_goals("p1", &goals).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Cancelled);
    assert_eq!(fx.llm.total_calls(), 0);
    assert!(fx.goals.advances().is_empty());
}

#[tokio::test]
async fn cancel_during_repair_makes_no_further_calls() {
    let fx = Fixture::new(&[("src/a.js", "let v = 1;\n")]);
    fx.llm.push_scope(r#"{"mustChange": ["src/a.js"], "testsNeeded": false}"#);
    fx.llm.push_implementation(&modify("src/a.js", "missing text", "x"));
    for _ in 0..2 {
        fx.llm.push_repair(r#"{"edits": []}"#);
        fx.llm.push_rewrite(r#"{"edits": []}"#);
    }
    let control = {
        let llm = fx.llm.clone();
        RunControl::new(
            move || match llm.calls_matching(prompts::REPAIR_SYSTEM) {
                0 => ControlSignal::Run,
                _ => ControlSignal::Cancel,
            },
            Duration::from_millis(1),
        )
    };

    let outcome = fx
        .controller(settings())
        .with_control(control)
        .process_goal("p1", &Goal::new("g1", "Bump the value"))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(fx.llm.total_calls(), 3);
    assert_eq!(fx.llm.calls_matching(prompts::REWRITE_SYSTEM), 0);
    assert_eq!(fx.files.content("src/a.js").as_deref(), Some("let v = 1;\n"));
    assert_eq!(
        fx.goals.phases_for("g1"),
        vec![GoalPhase::Testing, GoalPhase::Implementing]
    );
}

#[tokio::test]
async fn goal_resumed_at_verifying_skips_reflection() {
    let fx = Fixture::new(&[("src/a.js", "x")]);
    let mut goal = Goal::new("g1", "Add a footer");
    goal.phase = GoalPhase::Verifying;

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed, "{:?}", outcome.message);
    assert_eq!(fx.llm.total_calls(), 0);
    assert_eq!(fx.goals.phases_for("g1"), vec![GoalPhase::Ready]);
}

#[tokio::test]
async fn coverage_remediation_skips_implementation() {
    let fx = Fixture::new(&[("src/a.test.js", "it('a')\n")]);
    fx.llm.push_scope(r#"{"testsNeeded": true}"#);
    fx.llm.push_tests(&modify("src/a.test.js", "it('a')", "it('a')\nit('b')"));
    let mut goal = Goal::new("g1", "Raise coverage for a");
    goal.metadata.insert("coverageRemediation".to_string(), json!(true));

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.edits_applied, 1);
    assert_eq!(fx.llm.calls_matching(prompts::IMPLEMENTATION_SYSTEM), 0);
}

#[tokio::test]
async fn failing_test_context_forces_testing_stage() {
    let fx = Fixture::new(&[("src/a.test.js", "expect(1)\n"), ("src/a.js", "v = 1\n")]);
    fx.llm.push_scope(r#"{"testsNeeded": false}"#);
    fx.llm.push_tests(&modify("src/a.test.js", "1", "2"));
    fx.llm.push_implementation(&modify("src/a.js", "1", "2"));
    let mut goal = Goal::new("g1", "Handle the new value");
    goal.metadata
        .insert("failingTests".to_string(), json!(["a.test.js > returns 2"]));

    let outcome = fx.controller(settings()).process_goal("p1", &goal).await;

    assert_eq!(outcome.status, OutcomeStatus::Completed, "{:?}", outcome.message);
    assert!(outcome.tests_attempt_succeeded);
    assert_eq!(fx.llm.calls_matching(prompts::TEST_STAGE_SYSTEM), 1);
}

#[tokio::test]
async fn parents_are_processed_before_children() {
    let fx = Fixture::new(&[]);
    let mut child = Goal::new("child", "Stage the changes");
    child.parent_id = Some("parent".to_string());
    let parent = Goal::new("parent", "Create a branch");

    let outcomes = fx
        .controller(settings())
        .process_goals("p1", &[child, parent])
        .await;

    let ids: Vec<&str> = outcomes.iter().map(|o| o.goal_id.as_str()).collect();
    assert_eq!(ids, vec!["parent", "child"]);
    assert!(outcomes.iter().all(|o| o.success));
}

#[tokio::test]
async fn terminal_goals_are_not_reprocessed() {
    let fx = Fixture::new(&[]);
    let mut ready = Goal::new("g1", "Add a footer");
    ready.phase = GoalPhase::Ready;
    let mut failed = Goal::new("g2", "Add a header");
    failed.phase = GoalPhase::Failed;

    let controller = fx.controller(settings());
    let ready = controller.process_goal("p1", &ready).await;
    let failed = controller.process_goal("p1", &failed).await;

    assert_eq!(ready.skipped_reason.as_deref(), Some("already-ready"));
    assert!(ready.success);
    assert_eq!(failed.status, OutcomeStatus::Skipped);
    assert_eq!(fx.llm.total_calls(), 0);
}

#[tokio::test]
async fn file_applied_hook_sees_every_write() {
    let fx = Fixture::new(&[("src/a.js", "v = 1\n")]);
    fx.llm.push_scope(r#"{"mustChange": ["src/a.js"], "testsNeeded": false}"#);
    fx.llm.push_implementation(
        r#"{"edits": [
            {"type": "modify", "path": "src/a.js", "replacements": [{"search": "1", "replace": "2"}]},
            {"type": "upsert", "path": "src/b.js", "content": "export {}\n"}
        ]}"#,
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook: FileAppliedHook = {
        let seen = seen.clone();
        Arc::new(move |path: &str| seen.lock().unwrap().push(path.to_string()))
    };

    let outcome = fx
        .controller(settings())
        .with_file_applied_hook(hook)
        .process_goal("p1", &Goal::new("g1", "Split the module"))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Completed, "{:?}", outcome.message);
    assert_eq!(*seen.lock().unwrap(), vec!["src/a.js", "src/b.js"]);
    assert_eq!(fx.files.content("src/b.js").as_deref(), Some("export {}\n"));
}

#[test]
fn outcome_serializes_camel_case() {
    let outcome = GoalOutcome::new("g1", OutcomeStatus::Skipped).with_reason("goal-not-found");
    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["goalId"], "g1");
    assert_eq!(value["status"], "skipped");
    assert_eq!(value["skippedReason"], "goal-not-found");
    assert_eq!(value["testsAttemptSucceeded"], false);
    assert!(value.get("message").is_none());
}
