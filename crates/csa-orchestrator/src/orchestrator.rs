use std::path::PathBuf;

use csa_core::{AgentState, AppError, Decision, Intent, Phase};
use csa_embed::EmbeddingIndex;
use csa_executor::Executor;
use csa_llm::{LlmAdapter, LlmParams, ResponseFormat};
use csa_planner::{PlanValidator, Planner};
use csa_retrieval::RetrievalController;
use csa_safety::Safety;
use csa_tools::ToolBus;
use csa_trace::{EventBus, EventType};
use serde_json::json;
use tracing::{info, warn};

use crate::intent_classifier::IntentClassifier;
use crate::snapshot;

/// Hard-stop thresholds (spec.md §4.9).
#[derive(Clone, Copy, Debug)]
pub struct HardStopConfig {
    pub max_cycles: u32,
    pub max_rejections: u32,
    pub max_repeat_errors: u32,
}

impl Default for HardStopConfig {
    fn default() -> Self {
        Self {
            max_cycles: 6,
            max_rejections: 5,
            max_repeat_errors: 3,
        }
    }
}

/// Roles an LLM call may be made under; each may point at a different
/// model/provider per `.agent.yml` (spec.md §6).
pub struct LlmRoles<'a> {
    pub classifier: &'a dyn LlmAdapter,
    pub planner: &'a dyn LlmAdapter,
    pub developer: &'a dyn LlmAdapter,
}

/// Drives one goal through the agent state machine (spec.md §4.9).
pub struct Orchestrator<'a> {
    repo_root: PathBuf,
    llm: LlmRoles<'a>,
    bus: &'a ToolBus,
    safety: &'a Safety,
    event_bus: &'a EventBus,
    index: Option<&'a EmbeddingIndex>,
    retrieval_limit: usize,
    retrieval: RetrievalController,
    planner: Planner,
    validator: PlanValidator,
    classifier: IntentClassifier,
    hard_stops: HardStopConfig,
    state: AgentState,
    last_execution_succeeded: bool,
    dry_run: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        goal: impl Into<String>,
        llm: LlmRoles<'a>,
        bus: &'a ToolBus,
        safety: &'a Safety,
        event_bus: &'a EventBus,
        index: Option<&'a EmbeddingIndex>,
        retrieval_limit: usize,
        hard_stops: HardStopConfig,
    ) -> Self {
        let repo_root = repo_root.into();
        Self {
            retrieval: RetrievalController::with_default_dirs(&repo_root),
            repo_root,
            llm,
            bus,
            safety,
            event_bus,
            index,
            retrieval_limit,
            planner: Planner::new(),
            validator: PlanValidator::default(),
            classifier: IntentClassifier::new(),
            hard_stops,
            state: AgentState::new(goal),
            last_execution_succeeded: false,
            dry_run: false,
        }
    }

    /// Stops the run immediately after a plan is accepted, without
    /// dispatching any step through the ToolBus (spec.md §6 `--dry-run`,
    /// `auto.dry_run`).
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    fn repo_is_empty(&self) -> bool {
        std::fs::read_dir(&self.repo_root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    /// Runs the state machine to a terminal phase (`Done` or `Halted`),
    /// returning the final [`AgentState`].
    pub async fn run(mut self) -> AgentState {
        self.event_bus.publish(EventType::GoalStarted, json!({"goal": self.state.goal}));

        loop {
            if self.state.phase.is_terminal() {
                break;
            }
            self.event_bus.publish(EventType::PhaseChanged, json!({"phase": format!("{:?}", self.state.phase)}));
            match self.state.phase {
                Phase::Intent => self.do_intent().await,
                Phase::Planning => self.do_planning().await,
                Phase::Execution => self.do_execution().await,
                Phase::Observation => self.do_observation().await,
                Phase::Reduction => self.do_reduction().await,
                Phase::Decision => self.do_decision().await,
                Phase::Done | Phase::Halted => break,
            }
            if let Some(reason) = self.check_hard_stops() {
                self.halt(&reason).await;
                break;
            }
        }

        if self.state.phase == Phase::Done && self.bus.changes_made() {
            snapshot::finalize(&self.repo_root, &self.state.goal).await;
        }
        self.event_bus.publish(
            EventType::GoalCompleted,
            json!({"phase": format!("{:?}", self.state.phase), "cycle": self.state.cycle}),
        );
        self.state
    }

    async fn do_intent(&mut self) {
        let (intent, confidence) = self.classifier.classify(self.llm.classifier, &self.state.goal).await;
        self.state.intent = Some(intent);
        self.state.intent_confidence = confidence;

        match intent {
            Intent::Reject => {
                self.state.record_error("intent_reject", "request classified REJECT");
                self.state.phase = Phase::Halted;
            }
            Intent::Explain | Intent::Qna => {
                let answer = self.answer_inline().await;
                self.state.observations.push(csa_core::Observation {
                    step_id: 0,
                    summary: answer,
                    success: true,
                    artifact_excerpt: None,
                });
                self.state.phase = Phase::Done;
            }
            Intent::CodeEdit | Intent::Debug | Intent::CodeReview => {
                self.state.phase = Phase::Planning;
            }
        }
    }

    async fn answer_inline(&self) -> String {
        let prompt = format!("Answer the following directly and concisely:\n{}", self.state.goal);
        match self.llm.classifier.query(&prompt, &LlmParams::default(), ResponseFormat::Text).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "inline answer failed");
                format!("unable to answer: {err}")
            }
        }
    }

    async fn do_planning(&mut self) {
        self.state.cycle += 1;
        let repo_is_empty = self.repo_is_empty();
        let intent = self.state.intent.unwrap_or(Intent::CodeEdit);

        let retrieval = self
            .retrieval
            .retrieve_for_goal(&self.state.goal, intent, self.retrieval_limit, self.index, repo_is_empty)
            .await;
        self.state.retrieved_files = retrieval.files.clone();
        self.state.retrieval_cached = retrieval.cached;
        if retrieval.required_but_skipped(intent) {
            warn!(goal = %self.state.goal, "retrieval_required_but_skipped");
        }

        let raw_plan = match self
            .planner
            .plan(self.llm.planner, &self.state.goal, intent, &retrieval.files, repo_is_empty)
            .await
        {
            Ok(plan) => plan,
            Err(err) => {
                self.handle_planning_failure(&err.to_string()).await;
                return;
            }
        };

        let required_confidence = if repo_is_empty {
            csa_planner::EMPTY_REPO_MIN_CONFIDENCE
        } else {
            csa_planner::MIN_CONFIDENCE
        };
        if raw_plan.steps.is_empty() && raw_plan.confidence < required_confidence {
            self.state.observations.push(csa_core::Observation {
                step_id: 0,
                summary: "plan produced no actionable steps".to_string(),
                success: true,
                artifact_excerpt: None,
            });
            self.state.plan = Some(raw_plan);
            self.state.phase = Phase::Done;
            return;
        }

        match self.validator.validate(raw_plan, intent, repo_is_empty, &self.state.goal, self.safety) {
            Ok(validated) => {
                let fingerprint = validated.fingerprint();
                if self.state.plan_fingerprints.contains(&fingerprint) {
                    self.halt("repeated plan fingerprint across cycles").await;
                    return;
                }
                self.state.plan_fingerprints.insert(fingerprint);
                self.event_bus.publish(EventType::PlanProduced, json!({"plan_id": validated.plan_id, "steps": validated.steps.len()}));
                self.state.plan = Some(validated);
                self.state.phase = Phase::Execution;
            }
            Err(err) => self.handle_planning_failure(&err.to_string()).await,
        }
    }

    async fn handle_planning_failure(&mut self, reason: &str) {
        self.event_bus.publish(EventType::PlanRejected, json!({"reason": reason}));
        self.state.record_error("planning_failed", reason);
        if self.state.clarification_asked {
            self.halt(reason).await;
        } else {
            self.state.clarification_asked = true;
        }
    }

    async fn do_execution(&mut self) {
        let plan = self.state.plan.clone().expect("execution phase requires a validated plan");

        if self.dry_run {
            self.state.observations.push(csa_core::Observation {
                step_id: 0,
                summary: format!("dry run: {} step(s) validated, none executed", plan.steps.len()),
                success: true,
                artifact_excerpt: None,
            });
            self.last_execution_succeeded = true;
            self.state.phase = Phase::Done;
            return;
        }

        if self.state.snapshot_ref.is_none() && plan.steps.iter().any(|s| s.action.side_effect() != csa_core::SideEffect::Read) {
            self.state.snapshot_ref = snapshot::take_snapshot(&self.repo_root, &plan.plan_id).await;
        }

        let executor = Executor::new(self.bus, self.llm.developer);
        let outcome = executor.execute(&plan, &mut self.state).await;
        for observation in &outcome.observations {
            self.event_bus.publish(
                EventType::StepExecuted,
                json!({"step_id": observation.step_id, "success": observation.success}),
            );
        }
        self.state.observations.extend(outcome.observations);
        self.last_execution_succeeded = outcome.all_succeeded;
        self.state.phase = Phase::Observation;
    }

    async fn do_observation(&mut self) {
        info!(cycle = self.state.cycle, observations = self.state.observations.len(), "observation phase");
        self.state.phase = Phase::Reduction;
    }

    async fn do_reduction(&mut self) {
        self.state.phase = Phase::Decision;
    }

    async fn do_decision(&mut self) {
        let decision = if self.last_execution_succeeded {
            Decision::Done
        } else {
            Decision::Replan
        };
        self.state.last_decision = Some(decision);
        self.state.last_decision_confidence = if self.last_execution_succeeded { 1.0 } else { 0.5 };

        self.state.phase = match decision {
            Decision::Done => Phase::Done,
            Decision::Replan => Phase::Planning,
            Decision::Halt => Phase::Halted,
            Decision::Continue => Phase::Execution,
        };
    }

    fn check_hard_stops(&self) -> Option<String> {
        if self.state.phase.is_terminal() {
            return None;
        }
        if self.state.cycle >= self.hard_stops.max_cycles {
            return Some(format!("cycle {} reached max_cycles {}", self.state.cycle, self.hard_stops.max_cycles));
        }
        if self.state.tool_rejections >= self.hard_stops.max_rejections {
            return Some(format!(
                "tool_rejections {} reached max_rejections {}",
                self.state.tool_rejections, self.hard_stops.max_rejections
            ));
        }
        if self.state.repeat_error_count >= self.hard_stops.max_repeat_errors {
            return Some(format!(
                "repeat_error_count {} reached max_repeat_errors {} (signature: {})",
                self.state.repeat_error_count, self.hard_stops.max_repeat_errors, self.state.last_error_signature
            ));
        }
        None
    }

    async fn halt(&mut self, reason: &str) {
        self.state.record_error("hard_stop", reason);
        self.state.phase = Phase::Halted;
        self.event_bus.publish(EventType::HardStop, json!({"reason": reason}));
        if let Some(snapshot_ref) = self.state.snapshot_ref.clone() {
            if self.bus.changes_made() {
                snapshot::rollback(&self.repo_root, &snapshot_ref).await;
            }
        }
    }
}

/// Maps a terminal [`AgentState`] to the process exit code contract
/// (spec.md §6). Most halts are a generic hard-stop (3); a halt caused by
/// hitting `MAX_REJECTIONS` is a safety-adjacent stop (4); a halt that
/// followed a rolled-back execution failure is 5.
pub fn exit_code_for_state(state: &AgentState) -> i32 {
    match state.phase {
        Phase::Done => 0,
        Phase::Halted => {
            let rolled_back_execution_failure =
                state.snapshot_ref.is_some() && state.observations.last().is_some_and(|o| !o.success);
            if rolled_back_execution_failure {
                AppError::ExecutionFailure { step_id: 0, message: String::new() }.exit_code()
            } else if state.last_error_signature == "hard_stop" && state.tool_rejections >= 1 {
                AppError::ToolRejected { tool: String::new(), reason: String::new() }.exit_code()
            } else {
                AppError::PlanningFailed(String::new()).exit_code()
            }
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use csa_config::config::SafetyConfig;
    use csa_llm::OnToken;
    use std::sync::Arc;

    struct ScriptedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn query(&self, _prompt: &str, _params: &LlmParams, _format: ResponseFormat) -> Result<String, AppError> {
            Ok(self.response.clone())
        }
        async fn stream(&self, _: &str, _: &LlmParams, _: ResponseFormat, _: &mut OnToken<'_>) -> Result<String, AppError> {
            unimplemented!()
        }
        async fn embed(&self, _: &[String], _: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
            unimplemented!()
        }
        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn make_bus(root: &std::path::Path) -> ToolBus {
        let safety = Safety::new(
            root.to_path_buf(),
            &SafetyConfig {
                allow: vec!["**/*".into()],
                deny: vec![],
                program_allowlist: vec!["git".into()],
            },
        );
        ToolBus::new(root, safety, Arc::new(EventBus::new()))
    }

    fn init_git_repo(root: &std::path::Path) {
        std::process::Command::new("git").args(["init", "-q"]).current_dir(root).status().unwrap();
        std::process::Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(root)
            .status()
            .unwrap();
        std::process::Command::new("git").args(["config", "user.name", "test"]).current_dir(root).status().unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(root).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "initial"])
            .current_dir(root)
            .status()
            .unwrap();
    }

    #[tokio::test]
    async fn test_greeting_goal_reaches_done_without_planning() {
        let dir = tempfile::tempdir().unwrap();
        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec![] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "thanks for the answer".into() };
        let planner_llm = ScriptedLlm { response: String::new() };
        let developer_llm = ScriptedLlm { response: String::new() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "thanks!",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(exit_code_for_state(&state), 0);
    }

    #[tokio::test]
    async fn test_reject_intent_halts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec![] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"REJECT\", \"confidence\": 0.95}".into() };
        let planner_llm = ScriptedLlm { response: String::new() };
        let developer_llm = ScriptedLlm { response: String::new() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "delete the entire production database",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Halted);
        assert_eq!(exit_code_for_state(&state), 3);
    }

    #[tokio::test]
    async fn test_code_edit_goal_plans_and_executes_to_done() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/x.rb"), "old\n").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "add x.rb"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec!["git".into()] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"CODE_EDIT\", \"confidence\": 0.9}".into() };
        let plan_json = r#"{"confidence": 90, "steps": [
            {"step_id": 1, "action": "fs_read", "path": "lib/x.rb", "reason": "inspect"},
            {"step_id": 2, "action": "fs_write", "path": "lib/x.rb", "reason": "apply fix", "depends_on": [1]}
        ], "rollback_strategy": "git reset --hard"}"#;
        let planner_llm = ScriptedLlm { response: plan_json.into() };
        let developer_llm =
            ScriptedLlm { response: "--- a/lib/x.rb\n+++ b/lib/x.rb\n@@ -1,1 +1,1 @@\n-old\n+new\n".into() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "fix lib/x.rb",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(exit_code_for_state(&state), 0);
        let content = std::fs::read_to_string(dir.path().join("lib/x.rb")).unwrap();
        assert_eq!(content, "new\n");
        assert!(state.snapshot_ref.is_some());
    }

    #[tokio::test]
    async fn test_confident_empty_plan_resolves_done_in_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.rb"), "content\n").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "add a.rb"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec!["git".into()] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"CODE_EDIT\", \"confidence\": 0.9}".into() };
        let planner_llm = ScriptedLlm { response: "{\"confidence\": 90, \"steps\": []}".into() };
        let developer_llm = ScriptedLlm { response: String::new() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "do something vague with a.rb",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        // An empty but valid plan executes trivially (zero steps all
        // "succeed"), so decision resolves Done after a single cycle.
        assert_eq!(state.phase, Phase::Done);
        assert_eq!(state.cycle, 1);
    }

    #[tokio::test]
    async fn test_dry_run_validates_plan_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/x.rb"), "old\n").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "add x.rb"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec!["git".into()] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"CODE_EDIT\", \"confidence\": 0.9}".into() };
        let plan_json = r#"{"confidence": 90, "steps": [
            {"step_id": 1, "action": "fs_read", "path": "lib/x.rb", "reason": "inspect"},
            {"step_id": 2, "action": "fs_write", "path": "lib/x.rb", "reason": "apply fix", "depends_on": [1]}
        ]}"#;
        let planner_llm = ScriptedLlm { response: plan_json.into() };
        let developer_llm = ScriptedLlm { response: String::new() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "fix lib/x.rb",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        )
        .with_dry_run(true);
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Done);
        assert!(!bus.changes_made());
        let content = std::fs::read_to_string(dir.path().join("lib/x.rb")).unwrap();
        assert_eq!(content, "old\n");
    }

    /// A plan that mutates `lib/x.rb` then fails on its last step, forcing
    /// a replan. The scripted planner always returns the same JSON, so the
    /// second cycle's plan fingerprint matches the first — the stagnation
    /// branch must halt through `halt()` so the mutation is rolled back.
    #[tokio::test]
    async fn test_stagnation_halt_rolls_back_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/x.rb"), "old\n").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "add x.rb"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec!["git".into()] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"CODE_EDIT\", \"confidence\": 0.9}".into() };
        let plan_json = r#"{"confidence": 90, "steps": [
            {"step_id": 1, "action": "fs_read", "path": "lib/x.rb", "reason": "inspect"},
            {"step_id": 2, "action": "fs_write", "path": "lib/x.rb", "reason": "apply fix", "depends_on": [1]},
            {"step_id": 3, "action": "fs_read", "path": "does/not/exist.rb", "reason": "inspect missing"}
        ], "rollback_strategy": "git reset --hard"}"#;
        let planner_llm = ScriptedLlm { response: plan_json.into() };
        let developer_llm =
            ScriptedLlm { response: "--- a/lib/x.rb\n+++ b/lib/x.rb\n@@ -1,1 +1,1 @@\n-old\n+new\n".into() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "fix lib/x.rb and check does/not/exist.rb",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Halted);
        assert_eq!(state.last_error_signature, "hard_stop");
        let content = std::fs::read_to_string(dir.path().join("lib/x.rb")).unwrap();
        assert_eq!(content, "old\n", "rollback must restore the pre-halt working tree");
    }

    /// An LLM adapter that returns a different scripted response per call,
    /// for tests that need the planner's output to vary across cycles.
    struct SequencedLlm {
        responses: Vec<String>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl SequencedLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: responses.into_iter().map(String::from).collect(),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for SequencedLlm {
        async fn query(&self, _prompt: &str, _params: &LlmParams, _format: ResponseFormat) -> Result<String, AppError> {
            let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.responses[idx.min(self.responses.len() - 1)].clone())
        }
        async fn stream(&self, _: &str, _: &LlmParams, _: ResponseFormat, _: &mut OnToken<'_>) -> Result<String, AppError> {
            unimplemented!()
        }
        async fn embed(&self, _: &[String], _: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
            unimplemented!()
        }
        fn provider_name(&self) -> &'static str {
            "sequenced"
        }
    }

    /// First cycle mutates `lib/x.rb` then fails on its last step; the next
    /// two cycles get unparseable planner output, so the second consecutive
    /// planning failure exhausts the one-shot clarification retry and must
    /// halt through `halt()`, rolling back the first cycle's mutation.
    #[tokio::test]
    async fn test_clarification_exhausted_halt_rolls_back_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/x.rb"), "old\n").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "add x.rb"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let bus = make_bus(dir.path());
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig { allow: vec!["**/*".into()], deny: vec![], program_allowlist: vec!["git".into()] },
        );
        let event_bus = EventBus::new();
        let classifier_llm = ScriptedLlm { response: "{\"intent\": \"CODE_EDIT\", \"confidence\": 0.9}".into() };
        let plan_json = r#"{"confidence": 90, "steps": [
            {"step_id": 1, "action": "fs_read", "path": "lib/x.rb", "reason": "inspect"},
            {"step_id": 2, "action": "fs_write", "path": "lib/x.rb", "reason": "apply fix", "depends_on": [1]},
            {"step_id": 3, "action": "fs_read", "path": "does/not/exist.rb", "reason": "inspect missing"}
        ], "rollback_strategy": "git reset --hard"}"#;
        let planner_llm = SequencedLlm::new(vec![plan_json, "not json at all", "not json at all"]);
        let developer_llm =
            ScriptedLlm { response: "--- a/lib/x.rb\n+++ b/lib/x.rb\n@@ -1,1 +1,1 @@\n-old\n+new\n".into() };
        let orchestrator = Orchestrator::new(
            dir.path(),
            "fix lib/x.rb and check does/not/exist.rb",
            LlmRoles { classifier: &classifier_llm, planner: &planner_llm, developer: &developer_llm },
            &bus,
            &safety,
            &event_bus,
            None,
            5,
            HardStopConfig::default(),
        );
        let state = orchestrator.run().await;
        assert_eq!(state.phase, Phase::Halted);
        assert_eq!(state.last_error_signature, "hard_stop");
        assert!(state.clarification_asked);
        let content = std::fs::read_to_string(dir.path().join("lib/x.rb")).unwrap();
        assert_eq!(content, "old\n", "rollback must restore the pre-halt working tree");
    }
}
