use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use csa_core::{Action, AgentState, AppError, Phase};
use csa_process::{run_and_capture_with_stdin, StreamMode};
use csa_safety::Safety;
use csa_trace::{EventBus, EventType};
use serde_json::json;
use tokio::process::Command;
use tracing::warn;

use crate::diff_generator::DiffGenerator;
use crate::registry::ToolRegistry;

/// Output of a successful `fs.read`.
#[derive(Clone, Debug, PartialEq)]
pub struct FsReadOutput {
    pub content: String,
    pub mtime: i64,
}

/// Output of a successful `exec.run`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

/// The only component permitted to touch the filesystem or spawn processes
/// on the agent's behalf (spec.md §4.5). Every tool invocation passes
/// through the same validation order: tool exists, visible in the current
/// phase, args carry the fields the tool requires, Safety allows the path,
/// and — for `exec.run` — the program is allowlisted.
pub struct ToolBus {
    repo_root: PathBuf,
    safety: Safety,
    registry: ToolRegistry,
    diff_generator: DiffGenerator,
    changes_made: AtomicBool,
    event_bus: Arc<EventBus>,
}

impl ToolBus {
    pub fn new(repo_root: impl Into<PathBuf>, safety: Safety, event_bus: Arc<EventBus>) -> Self {
        Self {
            repo_root: repo_root.into(),
            safety,
            registry: ToolRegistry::default(),
            diff_generator: DiffGenerator::default(),
            changes_made: AtomicBool::new(false),
            event_bus,
        }
    }

    pub fn diff_generator(&self) -> &DiffGenerator {
        &self.diff_generator
    }

    /// True if any write/delete/exec has succeeded since the last `reset`.
    pub fn changes_made(&self) -> bool {
        self.changes_made.load(Ordering::SeqCst)
    }

    /// Clears the changes-made flag (spec.md §4.5 `reset!`).
    pub fn reset(&self) {
        self.changes_made.store(false, Ordering::SeqCst);
    }

    /// Records, logs, and publishes a tool rejection, then builds the error
    /// to return (spec.md §4.5 "On any failure: emit `tool_rejected` event
    /// with reason.").
    fn reject(&self, tool_name: &str, reason: String, state: &mut AgentState) -> AppError {
        state.tool_rejections += 1;
        warn!(tool = tool_name, reason = %reason, "tool_rejected");
        self.event_bus.publish(
            EventType::ToolRejected,
            json!({"tool": tool_name, "reason": reason}),
        );
        AppError::ToolRejected {
            tool: tool_name.to_string(),
            reason,
        }
    }

    fn validate(
        &self,
        tool_name: &str,
        phase: Phase,
        path_arg: Option<&str>,
        program_arg: Option<&str>,
        state: &mut AgentState,
    ) -> Result<(), AppError> {
        let reject = |state: &mut AgentState, reason: String| -> AppError {
            self.reject(tool_name, reason, state)
        };

        let Some(tool) = self.registry.get(tool_name) else {
            return Err(reject(state, "unknown tool".to_string()));
        };
        if !tool.phase_visibility.contains(&phase) {
            return Err(reject(state, format!("not visible in phase {phase:?}")));
        }
        if let Some(path) = path_arg {
            if !self.safety.path_allowed(path) {
                return Err(reject(state, format!("path not allowed: {path}")));
            }
        }
        if tool_name == "exec.run" {
            let Some(program) = program_arg else {
                return Err(reject(state, "exec.run requires a program".to_string()));
            };
            if !self.safety.program_allowed(program) {
                return Err(reject(state, format!("program not allowlisted: {program}")));
            }
        }
        Ok(())
    }

    pub async fn fs_read(
        &self,
        path: &str,
        phase: Phase,
        state: &mut AgentState,
    ) -> Result<FsReadOutput, AppError> {
        self.validate("fs.read", phase, Some(path), None, state)?;
        let full_path = self.repo_root.join(path);
        let content = std::fs::read_to_string(&full_path).map_err(|e| AppError::Io {
            path: full_path.display().to_string(),
            source: e,
        })?;
        let mtime = std::fs::metadata(&full_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        state.artifacts.files_read.insert(path.to_string());
        Ok(FsReadOutput { content, mtime })
    }

    pub async fn fs_create(
        &self,
        path: &str,
        content: &str,
        phase: Phase,
        state: &mut AgentState,
    ) -> Result<(), AppError> {
        self.validate("fs.create", phase, Some(path), None, state)?;
        let full_path = self.repo_root.join(path);
        if full_path.exists() {
            return Err(self.reject(
                "fs.create",
                format!("file already exists: {path}"),
                state,
            ));
        }
        let diff = self.diff_generator.add_file_diff(path, content);
        self.apply_diff(&diff).await?;
        state.artifacts.files_written.insert(path.to_string());
        state.artifacts.patches_applied += 1;
        self.changes_made.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn fs_write_diff(
        &self,
        path: &str,
        diff: &str,
        phase: Phase,
        state: &mut AgentState,
    ) -> Result<(), AppError> {
        self.validate("fs.write_diff", phase, Some(path), None, state)?;
        if !state.has_read(path) {
            return Err(self.reject(
                "fs.write_diff",
                format!("no prior fs.read of {path} in this goal"),
                state,
            ));
        }
        let full_path = self.repo_root.join(path);
        if !full_path.exists() {
            return Err(self.reject(
                "fs.write_diff",
                format!("file does not exist: {path}"),
                state,
            ));
        }
        self.apply_diff(diff).await?;
        state.artifacts.files_written.insert(path.to_string());
        state.artifacts.patches_applied += 1;
        self.changes_made.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn fs_delete(
        &self,
        path: &str,
        phase: Phase,
        state: &mut AgentState,
    ) -> Result<(), AppError> {
        self.validate("fs.delete", phase, Some(path), None, state)?;
        let full_path = self.repo_root.join(path);
        std::fs::remove_file(&full_path).map_err(|e| AppError::Io {
            path: full_path.display().to_string(),
            source: e,
        })?;
        state.artifacts.files_written.insert(path.to_string());
        self.changes_made.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn exec_run(
        &self,
        program: &str,
        args: &[String],
        accepted_exit_codes: Option<&[i32]>,
        allow_failure: bool,
        phase: Phase,
        state: &mut AgentState,
    ) -> Result<ExecOutput, AppError> {
        self.validate("exec.run", phase, None, Some(program), state)?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.repo_root);
        let result = run_and_capture_with_stdin(cmd, None, StreamMode::BufferOnly)
            .await
            .map_err(|e| AppError::ExecutionFailure {
                step_id: 0,
                message: e.to_string(),
            })?;

        let success = result.exit_code == 0
            || accepted_exit_codes.is_some_and(|codes| codes.contains(&result.exit_code))
            || allow_failure;

        state
            .artifacts
            .commands_run
            .push(format!("{program} {}", args.join(" ")));
        self.changes_made.store(true, Ordering::SeqCst);

        Ok(ExecOutput {
            stdout: result.output,
            stderr: result.stderr_output,
            exit_code: result.exit_code,
            success,
        })
    }

    /// Applies a unified diff deterministically via `git apply` — the only
    /// LLM-free path to mutating the filesystem (spec.md §4.5).
    async fn apply_diff(&self, diff: &str) -> Result<(), AppError> {
        let mut cmd = Command::new("git");
        cmd.args(["apply", "--reject", "--whitespace=fix", "-"])
            .current_dir(&self.repo_root);
        let result = run_and_capture_with_stdin(cmd, Some(diff.as_bytes().to_vec()), StreamMode::BufferOnly)
            .await
            .map_err(|e| AppError::ExecutionFailure {
                step_id: 0,
                message: format!("git apply failed to run: {e}"),
            })?;
        if result.exit_code != 0 {
            return Err(AppError::ExecutionFailure {
                step_id: 0,
                message: format!("git apply rejected diff: {}", result.stderr_output),
            });
        }
        Ok(())
    }
}

/// Maps a [`csa_core::Step`]'s action to the tool name the bus dispatches
/// to, for steps that map 1:1 onto a tool (everything but `fs.write` and
/// `BOOTSTRAP_REPO`, which the Executor expands).
pub fn tool_name_for(action: Action) -> Option<&'static str> {
    match action {
        Action::FsRead => Some("fs.read"),
        Action::FsCreate => Some("fs.create"),
        Action::FsDelete => Some("fs.delete"),
        Action::ExecRun => Some("exec.run"),
        Action::FsWrite | Action::BootstrapRepo => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_config::config::SafetyConfig;

    fn bus(root: &std::path::Path) -> ToolBus {
        let safety = Safety::new(
            root.to_path_buf(),
            &SafetyConfig {
                allow: vec!["**/*".into()],
                deny: vec![],
                program_allowlist: vec!["true".into(), "false".into()],
            },
        );
        ToolBus::new(root, safety, Arc::new(EventBus::new()))
    }

    fn init_git_repo(root: &std::path::Path) {
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(root)
            .status()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(root)
            .status()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.name", "test"])
            .current_dir(root)
            .status()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fs_read_records_artifact_and_returns_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rb"), "puts 1").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        let out = bus.fs_read("a.rb", Phase::Execution, &mut state).await.unwrap();
        assert_eq!(out.content, "puts 1");
        assert!(state.has_read("a.rb"));
    }

    #[tokio::test]
    async fn test_fs_read_wrong_phase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rb"), "puts 1").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        let err = bus.fs_read("a.rb", Phase::Planning, &mut state).await;
        assert!(err.is_err());
        assert_eq!(state.tool_rejections, 1);
    }

    #[tokio::test]
    async fn test_fs_create_applies_add_file_diff() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        bus.fs_create("new.rb", "puts 'hi'\n", Phase::Execution, &mut state)
            .await
            .unwrap();
        assert!(dir.path().join("new.rb").exists());
        assert!(bus.changes_made());
    }

    #[tokio::test]
    async fn test_fs_create_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("new.rb"), "existing").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        let err = bus.fs_create("new.rb", "puts 1", Phase::Execution, &mut state).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_fs_write_diff_requires_prior_read() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.rb"), "old\n").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        let diff = "--- a/a.rb\n+++ b/a.rb\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let err = bus.fs_write_diff("a.rb", diff, Phase::Execution, &mut state).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_fs_write_diff_applies_after_read() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.rb"), "old\n").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        bus.fs_read("a.rb", Phase::Execution, &mut state).await.unwrap();
        let diff = "--- a/a.rb\n+++ b/a.rb\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        bus.fs_write_diff("a.rb", diff, Phase::Execution, &mut state)
            .await
            .unwrap();
        let content = std::fs::read_to_string(dir.path().join("a.rb")).unwrap();
        assert_eq!(content, "new\n");
    }

    #[tokio::test]
    async fn test_fs_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rb"), "x").unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        bus.fs_delete("a.rb", Phase::Execution, &mut state).await.unwrap();
        assert!(!dir.path().join("a.rb").exists());
    }

    #[tokio::test]
    async fn test_exec_run_rejects_non_allowlisted_program() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        let mut state = AgentState::new("goal");
        let err = bus
            .exec_run("curl", &[], None, false, Phase::Execution, &mut state)
            .await;
        assert!(err.is_err());
        assert_eq!(state.tool_rejections, 1);
    }

    #[tokio::test]
    async fn test_exec_run_accepted_exit_code_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig {
                allow: vec!["**/*".into()],
                deny: vec![],
                program_allowlist: vec!["sh".into()],
            },
        );
        let bus = ToolBus::new(dir.path(), safety, Arc::new(EventBus::new()));
        let mut state = AgentState::new("goal");
        let out = bus
            .exec_run(
                "sh",
                &["-c".to_string(), "exit 1".to_string()],
                Some(&[1]),
                false,
                Phase::Execution,
                &mut state,
            )
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, 1);
    }

    #[test]
    fn test_tool_name_for_maps_actions() {
        assert_eq!(tool_name_for(Action::FsRead), Some("fs.read"));
        assert_eq!(tool_name_for(Action::FsWrite), None);
        assert_eq!(tool_name_for(Action::BootstrapRepo), None);
    }

    #[tokio::test]
    async fn test_tool_rejection_publishes_tool_rejected_event() {
        use std::sync::atomic::AtomicUsize;

        let dir = tempfile::tempdir().unwrap();
        let safety = Safety::new(
            dir.path().to_path_buf(),
            &SafetyConfig {
                allow: vec!["**/*".into()],
                deny: vec![],
                program_allowlist: vec![],
            },
        );
        let event_bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_handle = seen.clone();
        event_bus.subscribe(
            EventType::ToolRejected,
            Arc::new(move |event| {
                assert_eq!(event.payload["tool"], "exec.run");
                seen_handle.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let bus = ToolBus::new(dir.path(), safety, event_bus);
        let mut state = AgentState::new("goal");
        let err = bus
            .exec_run("curl", &[], None, false, Phase::Execution, &mut state)
            .await;
        assert!(err.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_clears_changes_made() {
        let dir = tempfile::tempdir().unwrap();
        let bus = bus(dir.path());
        bus.changes_made.store(true, Ordering::SeqCst);
        assert!(bus.changes_made());
        bus.reset();
        assert!(!bus.changes_made());
    }
}
