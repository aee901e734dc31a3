use csa_core::{Action, AgentState, Observation, Phase, Plan, Step, StepResult};
use csa_llm::LlmAdapter;
use csa_tools::ToolBus;
use tracing::{debug, warn};

const EXCERPT_LEN: usize = 280;

/// Outcome of executing a plan: the observations recorded (one per step
/// attempted) and whether every step succeeded.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub observations: Vec<Observation>,
    pub all_succeeded: bool,
}

/// Executes a validated [`Plan`] sequentially against a [`ToolBus`]
/// (spec.md §4.8). A step's failure aborts the remaining plan; the caller
/// (Orchestrator) decides the next phase from the partial result.
pub struct Executor<'a> {
    bus: &'a ToolBus,
    developer_llm: &'a dyn LlmAdapter,
}

impl<'a> Executor<'a> {
    pub fn new(bus: &'a ToolBus, developer_llm: &'a dyn LlmAdapter) -> Self {
        Self { bus, developer_llm }
    }

    pub async fn execute(&self, plan: &Plan, state: &mut AgentState) -> ExecutionOutcome {
        let mut observations = Vec::with_capacity(plan.steps.len());
        let mut all_succeeded = true;

        for step in &plan.steps {
            state.current_step = step.step_id;
            let observation = self.execute_step(step, &plan.goal, state).await;
            let success = observation.success;
            observations.push(observation);
            if !success {
                all_succeeded = false;
                break;
            }
        }

        ExecutionOutcome {
            observations,
            all_succeeded,
        }
    }

    async fn execute_step(&self, step: &Step, goal: &str, state: &mut AgentState) -> Observation {
        debug!(step_id = step.step_id, action = ?step.action, "executing step");
        let result = self.dispatch(step, goal, state).await;
        let (success, artifact, error) = match result {
            Ok(artifact) => (true, artifact, None),
            Err(message) => {
                warn!(step_id = step.step_id, reason = %message, "step failed");
                state.record_error(format!("{:?}:{}", step.action, step.path.as_deref().unwrap_or("")), &message);
                (false, None, Some(message))
            }
        };

        state.step_results.insert(
            step.step_id,
            StepResult {
                success,
                artifact: artifact.clone(),
                error: error.clone(),
            },
        );

        Observation {
            step_id: step.step_id,
            summary: error.clone().unwrap_or_else(|| step.reason.clone()),
            success,
            artifact_excerpt: artifact.map(|a| excerpt(&a)),
        }
    }

    async fn dispatch(&self, step: &Step, goal: &str, state: &mut AgentState) -> Result<Option<String>, String> {
        match step.action {
            Action::FsRead => {
                let path = step.path.as_deref().ok_or("fs_read step has no path")?;
                let out = self
                    .bus
                    .fs_read(path, Phase::Execution, state)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Some(out.content))
            }
            Action::FsCreate => {
                let path = step.path.as_deref().ok_or("fs_create step has no path")?;
                let content = step.content.as_deref().unwrap_or("");
                self.bus
                    .fs_create(path, content, Phase::Execution, state)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::FsWrite => self.execute_write(step, goal, state).await,
            Action::FsDelete => {
                let path = step.path.as_deref().ok_or("fs_delete step has no path")?;
                self.bus
                    .fs_delete(path, Phase::Execution, state)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::ExecRun => {
                let command = step.command.as_deref().ok_or("exec_run step has no command")?;
                let out = self
                    .bus
                    .exec_run(
                        command,
                        &step.args,
                        step.accepted_exit_codes.as_deref(),
                        step.allow_failure,
                        Phase::Execution,
                        state,
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                if out.success {
                    Ok(Some(out.stdout))
                } else {
                    Err(format!("exec.run exited {}: {}", out.exit_code, out.stderr))
                }
            }
            Action::BootstrapRepo => self.execute_bootstrap(state).await,
        }
    }

    /// `fs.write` carries no tool of its own: translate it into
    /// `{read original → DiffGenerator → fs.write_diff}` unless the step
    /// already supplied an explicit unified diff in `content`.
    async fn execute_write(&self, step: &Step, goal: &str, state: &mut AgentState) -> Result<Option<String>, String> {
        let path = step.path.as_deref().ok_or("fs_write step has no path")?;

        let original = self
            .bus
            .fs_read(path, Phase::Execution, state)
            .await
            .map_err(|e| e.to_string())?
            .content;

        let diff = match &step.content {
            Some(explicit) if explicit.contains("@@") => explicit.clone(),
            _ => self
                .bus
                .diff_generator()
                .edit_diff(self.developer_llm, path, &original, goal, &step.reason)
                .await
                .map_err(|e| e.to_string())?,
        };

        self.bus
            .fs_write_diff(path, &diff, Phase::Execution, state)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Some(diff))
    }

    /// Expands `BOOTSTRAP_REPO` into the minimal set of tool calls that turn
    /// an empty repository into one other steps can operate on: a git
    /// repository with a root `README.md`.
    async fn execute_bootstrap(&self, state: &mut AgentState) -> Result<Option<String>, String> {
        let init = self
            .bus
            .exec_run("git", &["init".to_string()], None, true, Phase::Execution, state)
            .await
            .map_err(|e| e.to_string())?;
        if !init.success {
            return Err(format!("git init failed: {}", init.stderr));
        }
        let readme_exists = self.bus.fs_read("README.md", Phase::Execution, state).await.is_ok();
        if !readme_exists {
            self.bus
                .fs_create("README.md", &format!("# {}\n", state.goal), Phase::Execution, state)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(Some("bootstrapped repository".to_string()))
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LEN {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(EXCERPT_LEN).collect();
        format!("{truncated}...")
    }
}
