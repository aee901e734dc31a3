use std::path::Path;

use csa_process::run_and_capture;
use tokio::process::Command;
use tracing::warn;

/// Commits an allow-empty snapshot before the first destructive action
/// (spec.md §4.9), returning the resulting commit hash to roll back to.
/// Uses the same process-spawning path as `exec.run`, but outside the
/// ToolBus: this is infrastructure, not a plan step.
pub async fn take_snapshot(repo_root: &Path, goal_id: &str) -> Option<String> {
    let mut commit = Command::new("git");
    commit
        .args(["commit", "--allow-empty", "-m", &format!("agent snapshot {goal_id}")])
        .current_dir(repo_root);
    if let Err(err) = run_and_capture(commit).await {
        warn!(error = %err, "failed to create snapshot commit");
        return None;
    }

    let mut rev_parse = Command::new("git");
    rev_parse.args(["rev-parse", "HEAD"]).current_dir(repo_root);
    match run_and_capture(rev_parse).await {
        Ok(result) if result.exit_code == 0 => Some(result.output.trim().to_string()),
        Ok(result) => {
            warn!(exit_code = result.exit_code, "git rev-parse HEAD failed after snapshot");
            None
        }
        Err(err) => {
            warn!(error = %err, "failed to read snapshot ref");
            None
        }
    }
}

/// Discards all working-tree changes back to `snapshot_ref` (spec.md §4.9
/// fatal-halt rollback).
pub async fn rollback(repo_root: &Path, snapshot_ref: &str) {
    let mut reset = Command::new("git");
    reset.args(["reset", "--hard", snapshot_ref]).current_dir(repo_root);
    if let Err(err) = run_and_capture(reset).await {
        warn!(error = %err, snapshot_ref, "rollback failed");
    }
}

/// Commits all outstanding changes as the final state of a successful run.
pub async fn finalize(repo_root: &Path, goal: &str) {
    let mut add = Command::new("git");
    add.args(["add", "-A"]).current_dir(repo_root);
    if let Err(err) = run_and_capture(add).await {
        warn!(error = %err, "git add -A failed during finalize");
        return;
    }
    let mut commit = Command::new("git");
    commit
        .args(["commit", "-m", &format!("agent: {goal}"), "--allow-empty"])
        .current_dir(repo_root);
    if let Err(err) = run_and_capture(commit).await {
        warn!(error = %err, "finalize commit failed");
    }
}
