use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Coarse classification of a goal, gating retrieval and tool surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Explain,
    CodeEdit,
    Debug,
    CodeReview,
    Qna,
    Reject,
}

impl Intent {
    /// Intents for which retrieval is mandatory (spec.md §4.3).
    pub fn requires_retrieval(&self) -> bool {
        matches!(self, Intent::CodeEdit | Intent::Debug | Intent::CodeReview)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Explain => "EXPLAIN",
            Intent::CodeEdit => "CODE_EDIT",
            Intent::Debug => "DEBUG",
            Intent::CodeReview => "CODE_REVIEW",
            Intent::Qna => "QNA",
            Intent::Reject => "REJECT",
        };
        write!(f, "{s}")
    }
}

/// Phase of the agent state machine (spec.md §4.9). Transitions only along
/// the declared graph; terminal phases are `Done` and `Halted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intent,
    Planning,
    Execution,
    Observation,
    Reduction,
    Decision,
    Done,
    Halted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Halted)
    }
}

/// Decision the orchestrator reaches after reduction (spec.md §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Replan,
    Done,
    Halt,
}

/// The smallest executable unit; maps 1:1 to a ToolBus invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    FsRead,
    FsCreate,
    FsWrite,
    FsDelete,
    ExecRun,
    BootstrapRepo,
}

impl Action {
    pub fn side_effect(&self) -> SideEffect {
        match self {
            Action::FsRead => SideEffect::Read,
            Action::FsCreate | Action::FsWrite | Action::FsDelete => SideEffect::Write,
            Action::ExecRun => SideEffect::Exec,
            Action::BootstrapRepo => SideEffect::Write,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Read,
    Write,
    Exec,
    None,
}

/// One step of a validated [`Plan`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub step_id: i64,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub reason: String,
    #[serde(default)]
    pub depends_on: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_exit_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub allow_failure: bool,
}

/// Immutable value produced by the Planner (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub goal: String,
    pub confidence: i32,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub rollback_strategy: String,
    #[serde(default)]
    pub retrieved_files: Vec<String>,
}

impl Plan {
    /// A stable fingerprint used by the stagnation detector (spec.md §4.9 hard
    /// stop #4): two cycles producing the same fingerprint signal the loop is
    /// not converging.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(format!("{:?}", step.action));
            hasher.update(step.path.as_deref().unwrap_or(""));
            hasher.update(step.command.as_deref().unwrap_or(""));
            hasher.update(step.args.join(" "));
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Result recorded for one executed step (spec.md §3 `step_results`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-step summary consumed by the orchestrator's reduction phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub step_id: i64,
    pub summary: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_excerpt: Option<String>,
}

/// Bookkeeping for one goal run's side effects (spec.md §3 `artifacts`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub files_read: HashSet<String>,
    pub files_written: HashSet<String>,
    pub patches_applied: u32,
    pub commands_run: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub signature: String,
    pub message: String,
}

/// Exclusively owned by one run; lifetime = one goal (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub goal: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub intent_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub current_step: i64,
    pub step_results: HashMap<i64, StepResult>,

    pub artifacts: Artifacts,

    pub observations: Vec<Observation>,
    pub errors: Vec<ErrorRecord>,

    pub cycle: u32,
    pub tool_rejections: u32,
    pub plan_fingerprints: HashSet<String>,
    pub clarification_asked: bool,

    pub last_error_signature: String,
    pub repeat_error_count: u32,

    pub retrieved_files: Vec<String>,
    pub retrieval_cached: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<Decision>,
    pub last_decision_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl AgentState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            phase: Phase::Intent,
            intent: None,
            intent_confidence: 0.0,
            plan: None,
            current_step: 0,
            step_results: HashMap::new(),
            artifacts: Artifacts::default(),
            observations: Vec::new(),
            errors: Vec::new(),
            cycle: 0,
            tool_rejections: 0,
            plan_fingerprints: HashSet::new(),
            clarification_asked: false,
            last_error_signature: String::new(),
            repeat_error_count: 0,
            retrieved_files: Vec::new(),
            retrieval_cached: false,
            last_decision: None,
            last_decision_confidence: 0.0,
            snapshot_ref: None,
            cancelled: false,
        }
    }

    /// Records an error, bumping `repeat_error_count` when the signature
    /// repeats consecutively (spec.md §3 invariant backing hard stop #3).
    pub fn record_error(&mut self, signature: impl Into<String>, message: impl Into<String>) {
        let signature = signature.into();
        if signature == self.last_error_signature {
            self.repeat_error_count += 1;
        } else {
            self.repeat_error_count = 1;
        }
        self.last_error_signature = signature.clone();
        self.errors.push(ErrorRecord {
            signature,
            message: message.into(),
        });
    }

    /// True once a path has a recorded `fs.read` in this goal — the
    /// read-before-write invariant checked by both the validator and the
    /// tool bus.
    pub fn has_read(&self, path: &str) -> bool {
        self.artifacts.files_read.contains(path)
    }
}

/// A named, schema-validated capability with a safety classification
/// (spec.md §3 `Tool`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub phase_visibility: HashSet<Phase>,
    pub side_effects: SideEffect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_requires_retrieval() {
        assert!(Intent::CodeEdit.requires_retrieval());
        assert!(Intent::Debug.requires_retrieval());
        assert!(Intent::CodeReview.requires_retrieval());
        assert!(!Intent::Explain.requires_retrieval());
        assert!(!Intent::Qna.requires_retrieval());
    }

    #[test]
    fn test_phase_terminal() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Halted.is_terminal());
        assert!(!Phase::Planning.is_terminal());
    }

    #[test]
    fn test_plan_fingerprint_stable_and_sensitive() {
        let mut plan = Plan {
            plan_id: "p1".into(),
            goal: "g".into(),
            confidence: 80,
            steps: vec![Step {
                step_id: 1,
                action: Action::FsRead,
                path: Some("lib/x.rb".into()),
                content: None,
                command: None,
                args: vec![],
                reason: "read".into(),
                depends_on: vec![],
                accepted_exit_codes: None,
                allow_failure: false,
            }],
            blockers: vec![],
            assumptions: vec![],
            success_criteria: vec![],
            rollback_strategy: String::new(),
            retrieved_files: vec![],
        };
        let fp1 = plan.fingerprint();
        let fp2 = plan.fingerprint();
        assert_eq!(fp1, fp2);

        plan.steps[0].path = Some("lib/y.rb".into());
        assert_ne!(fp1, plan.fingerprint());
    }

    #[test]
    fn test_record_error_repeat_count() {
        let mut state = AgentState::new("goal");
        state.record_error("sig-a", "first");
        assert_eq!(state.repeat_error_count, 1);
        state.record_error("sig-a", "second");
        assert_eq!(state.repeat_error_count, 2);
        state.record_error("sig-b", "third");
        assert_eq!(state.repeat_error_count, 1);
    }

    #[test]
    fn test_has_read() {
        let mut state = AgentState::new("goal");
        assert!(!state.has_read("lib/x.rb"));
        state.artifacts.files_read.insert("lib/x.rb".into());
        assert!(state.has_read("lib/x.rb"));
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let state = AgentState::new("add tests");
        let json = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.goal, "add tests");
        assert_eq!(back.phase, Phase::Intent);
    }
}
