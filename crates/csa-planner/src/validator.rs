use std::collections::{HashMap, HashSet};

use csa_core::{Action, AppError, Intent, Plan, Step};
use csa_retrieval::mentioned_literally;
use csa_safety::Safety;

/// Default minimum confidence for a non-empty repo (spec.md §4.7).
pub const MIN_CONFIDENCE: i32 = 50;
/// Minimum confidence required (and enforced) for an empty repo.
pub const EMPTY_REPO_MIN_CONFIDENCE: i32 = 70;

/// Rejects malformed or unsafe plans before they reach the Executor
/// (spec.md §4.7). Never mutates a plan except the one documented
/// exception: inserting a missing `BOOTSTRAP_REPO` step for empty repos.
pub struct PlanValidator {
    min_confidence: i32,
    empty_repo_min_confidence: i32,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self {
            min_confidence: MIN_CONFIDENCE,
            empty_repo_min_confidence: EMPTY_REPO_MIN_CONFIDENCE,
        }
    }
}

impl PlanValidator {
    pub fn new(min_confidence: i32, empty_repo_min_confidence: i32) -> Self {
        Self {
            min_confidence,
            empty_repo_min_confidence,
        }
    }

    /// Validates `plan` in place, possibly inserting `BOOTSTRAP_REPO` for an
    /// empty repo, and returns the (possibly amended) plan or a typed
    /// `PlanningFailed` reason.
    pub fn validate(
        &self,
        mut plan: Plan,
        intent: Intent,
        repo_is_empty: bool,
        prompt: &str,
        safety: &Safety,
    ) -> Result<Plan, AppError> {
        if repo_is_empty {
            self.ensure_bootstrap_first(&mut plan);
        }

        let required_confidence = if repo_is_empty {
            self.empty_repo_min_confidence
        } else {
            self.min_confidence
        };
        if plan.confidence < required_confidence {
            return Err(fail(format!(
                "confidence {} below required {required_confidence}",
                plan.confidence
            )));
        }

        self.check_step_ids(&plan.steps, repo_is_empty)?;
        self.check_read_before_write(&plan.steps)?;
        self.check_no_write_create_collision(&plan.steps)?;
        self.check_exec_steps(&plan.steps, safety)?;
        if intent.requires_retrieval() {
            self.check_retrieval_coverage(&plan, prompt)?;
        }

        Ok(plan)
    }

    fn ensure_bootstrap_first(&self, plan: &mut Plan) {
        let has_bootstrap = plan.steps.first().is_some_and(|s| s.action == Action::BootstrapRepo);
        if has_bootstrap {
            return;
        }
        for step in &mut plan.steps {
            step.step_id += 1;
            for dep in &mut step.depends_on {
                *dep += 1;
            }
        }
        plan.steps.insert(
            0,
            Step {
                step_id: 0,
                action: Action::BootstrapRepo,
                path: None,
                content: None,
                command: None,
                args: vec![],
                reason: "repository is empty".to_string(),
                depends_on: vec![],
                accepted_exit_codes: None,
                allow_failure: false,
            },
        );
        plan.confidence = plan.confidence.max(self.empty_repo_min_confidence);
    }

    fn check_step_ids(&self, steps: &[Step], repo_is_empty: bool) -> Result<(), AppError> {
        if steps.is_empty() {
            return Ok(());
        }
        let expected_first = if repo_is_empty && steps[0].action == Action::BootstrapRepo {
            0
        } else {
            1
        };
        let mut seen = HashSet::new();
        let mut expected = expected_first;
        for step in steps {
            if step.step_id != expected {
                return Err(fail(format!(
                    "step_id {} out of order; expected ascending from {expected_first}",
                    step.step_id
                )));
            }
            if !seen.insert(step.step_id) {
                return Err(fail(format!("duplicate step_id {}", step.step_id)));
            }
            expected += 1;
        }
        Ok(())
    }

    fn check_read_before_write(&self, steps: &[Step]) -> Result<(), AppError> {
        let by_id: HashMap<i64, &Step> = steps.iter().map(|s| (s.step_id, s)).collect();
        for step in steps {
            if step.action != Action::FsWrite {
                continue;
            }
            let Some(path) = &step.path else {
                return Err(fail(format!("fs_write step {} has no path", step.step_id)));
            };
            if !has_transitive_read_of(path, &step.depends_on, &by_id, &mut HashSet::new()) {
                return Err(fail(format!(
                    "fs_write step {} ({path}) has no transitive fs_read dependency on the same path",
                    step.step_id
                )));
            }
        }
        Ok(())
    }

    fn check_no_write_create_collision(&self, steps: &[Step]) -> Result<(), AppError> {
        let created: HashSet<&str> = steps
            .iter()
            .filter(|s| s.action == Action::FsCreate)
            .filter_map(|s| s.path.as_deref())
            .collect();
        for step in steps {
            if step.action == Action::FsWrite {
                if let Some(path) = &step.path {
                    if created.contains(path.as_str()) {
                        return Err(fail(format!(
                            "path {path} is both fs_create and fs_write in the same plan"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_exec_steps(&self, steps: &[Step], safety: &Safety) -> Result<(), AppError> {
        for step in steps {
            if step.action != Action::ExecRun {
                continue;
            }
            let Some(command) = step.command.as_deref().filter(|c| !c.is_empty()) else {
                return Err(fail(format!("exec_run step {} has no command", step.step_id)));
            };
            if !safety.program_allowed(command) {
                return Err(fail(format!(
                    "exec_run step {} uses non-allowlisted program {command}",
                    step.step_id
                )));
            }
        }
        Ok(())
    }

    fn check_retrieval_coverage(&self, plan: &Plan, prompt: &str) -> Result<(), AppError> {
        for step in &plan.steps {
            let Some(path) = &step.path else { continue };
            let in_retrieved = plan.retrieved_files.iter().any(|f| f == path);
            let literal = mentioned_literally(prompt, std::path::Path::new(path));
            if !in_retrieved && !literal {
                return Err(fail(format!(
                    "path {path} referenced by step {} is neither retrieved nor mentioned verbatim in the prompt",
                    step.step_id
                )));
            }
        }
        Ok(())
    }
}

fn has_transitive_read_of(
    path: &str,
    deps: &[i64],
    by_id: &HashMap<i64, &Step>,
    visited: &mut HashSet<i64>,
) -> bool {
    for &dep_id in deps {
        if !visited.insert(dep_id) {
            continue;
        }
        let Some(dep_step) = by_id.get(&dep_id) else { continue };
        if dep_step.action == Action::FsRead && dep_step.path.as_deref() == Some(path) {
            return true;
        }
        if has_transitive_read_of(path, &dep_step.depends_on, by_id, visited) {
            return true;
        }
    }
    false
}

fn fail(reason: String) -> AppError {
    AppError::PlanningFailed(reason)
}
