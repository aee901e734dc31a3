use csa_core::{Action, AppError, Intent, Plan, Step};
use csa_llm::{LlmAdapter, LlmParams, ResponseFormat};
use serde::Deserialize;
use serde_json::Value;

/// Builds the prompt, calls the planner-role LLM, and parses the result
/// into a [`Plan`] (spec.md §4.7). Never validates the plan itself — that
/// is [`crate::validator::PlanValidator`]'s job.
pub struct Planner;

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic prompt assembly: system framing, retrieval constraint,
    /// workspace hint, JSON-schema instructions, the task itself.
    pub fn build_prompt(&self, goal: &str, intent: Intent, retrieved_files: &[String], repo_is_empty: bool) -> String {
        let retrieval_block = if retrieved_files.is_empty() {
            "No files were retrieved for this goal.".to_string()
        } else {
            format!(
                "Retrieved files you may reference by path:\n{}",
                retrieved_files.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n")
            )
        };
        let workspace_hint = if repo_is_empty {
            "The repository is currently empty; the first step must be BOOTSTRAP_REPO."
        } else {
            "The repository already contains files; only reference files that exist or are retrieved."
        };
        format!(
            "You are the planning stage of an autonomous coding agent. Intent classified as {intent}.\n\
             {workspace_hint}\n{retrieval_block}\n\n\
             Respond with ONLY a single JSON object (no markdown fences, no prose) matching:\n\
             {{\"confidence\": <0-100 or 0.0-1.0>, \"steps\": [{{\"step_id\": <int>, \"action\": \
             \"fs_read\"|\"fs_create\"|\"fs_write\"|\"fs_delete\"|\"exec_run\"|\"bootstrap_repo\", \
             \"path\": <string, optional>, \"content\": <string, optional>, \"command\": <string, optional>, \
             \"args\": [<string>], \"reason\": <string>, \"depends_on\": [<int>], \
             \"accepted_exit_codes\": [<int>, optional], \"allow_failure\": <bool, optional>}}], \
             \"blockers\": [<string>], \"assumptions\": [<string>], \"success_criteria\": [<string>], \
             \"rollback_strategy\": <string>}}\n\n\
             Task: {goal}"
        )
    }

    /// Calls the LLM and parses its response into an unvalidated [`Plan`].
    pub async fn plan(
        &self,
        llm: &dyn LlmAdapter,
        goal: &str,
        intent: Intent,
        retrieved_files: &[String],
        repo_is_empty: bool,
    ) -> Result<Plan, AppError> {
        let prompt = self.build_prompt(goal, intent, retrieved_files, repo_is_empty);
        let raw = llm
            .query(&prompt, &LlmParams::low_temperature(), ResponseFormat::JsonObject)
            .await?;
        self.parse(&raw, goal, retrieved_files)
    }

    /// Strips fences, extracts the outermost `{...}`, parses, and coerces
    /// into a [`Plan]`. Exposed separately from [`Self::plan`] for tests
    /// that exercise parsing without a live LLM call.
    pub fn parse(&self, raw: &str, goal: &str, retrieved_files: &[String]) -> Result<Plan, AppError> {
        let json_text = extract_json_object(raw)
            .ok_or_else(|| AppError::PlanningFailed(format!("no JSON object found in planner output: {raw}")))?;
        let value: Value = serde_json::from_str(&json_text)
            .map_err(|e| AppError::PlanningFailed(format!("malformed plan JSON: {e}")))?;

        let confidence = normalize_confidence(&value["confidence"]);

        let steps_value = value
            .get("steps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut steps = Vec::with_capacity(steps_value.len());
        for (i, raw_step) in steps_value.into_iter().enumerate() {
            steps.push(coerce_step(raw_step, i as i64 + 1)?);
        }

        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };

        Ok(Plan {
            plan_id: ulid::Ulid::new().to_string(),
            goal: goal.to_string(),
            confidence,
            steps,
            blockers: strings("blockers"),
            assumptions: strings("assumptions"),
            success_criteria: strings("success_criteria"),
            rollback_strategy: value.get("rollback_strategy").and_then(Value::as_str).unwrap_or("").to_string(),
            retrieved_files: retrieved_files.to_vec(),
        })
    }
}

/// Parses a 0..1 float scaled to 0..100, or an already-0..100 value.
fn normalize_confidence(value: &Value) -> i32 {
    let raw = value.as_f64().unwrap_or(0.0);
    let scaled = if raw > 0.0 && raw <= 1.0 { raw * 100.0 } else { raw };
    scaled.round().clamp(0.0, 100.0) as i32
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    step_id: Option<i64>,
    action: Action,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    depends_on: Vec<i64>,
    #[serde(default)]
    accepted_exit_codes: Option<Vec<i32>>,
    #[serde(default)]
    allow_failure: bool,
}

/// A step entry is either a full step object or a bare string naming the
/// intended action, e.g. `"fs_read lib/widget.rb: check current impl"`.
/// Bare strings must start with a known action token; anything else fails
/// loudly rather than guessing at a side-effecting action.
fn coerce_step(raw: Value, fallback_id: i64) -> Result<Step, AppError> {
    if let Value::String(text) = &raw {
        let (action, rest) = text
            .split_once(char::is_whitespace)
            .map(|(a, r)| (a, r.trim()))
            .unwrap_or((text.as_str(), ""));
        let action = parse_action_token(action).ok_or_else(|| {
            AppError::PlanningFailed(format!("bare plan step does not start with a known action: {text}"))
        })?;
        return Ok(Step {
            step_id: fallback_id,
            action,
            path: None,
            content: None,
            command: None,
            args: vec![],
            reason: if rest.is_empty() { text.clone() } else { rest.to_string() },
            depends_on: vec![],
            accepted_exit_codes: None,
            allow_failure: false,
        });
    }

    let parsed: RawStep =
        serde_json::from_value(raw).map_err(|e| AppError::PlanningFailed(format!("malformed step: {e}")))?;
    Ok(Step {
        step_id: parsed.step_id.unwrap_or(fallback_id),
        action: parsed.action,
        path: parsed.path,
        content: parsed.content,
        command: parsed.command,
        args: parsed.args,
        reason: parsed.reason,
        depends_on: parsed.depends_on,
        accepted_exit_codes: parsed.accepted_exit_codes,
        allow_failure: parsed.allow_failure,
    })
}

fn parse_action_token(token: &str) -> Option<Action> {
    match token.trim_end_matches(':').to_ascii_lowercase().replace('.', "_").as_str() {
        "fs_read" => Some(Action::FsRead),
        "fs_create" => Some(Action::FsCreate),
        "fs_write" => Some(Action::FsWrite),
        "fs_delete" => Some(Action::FsDelete),
        "exec_run" => Some(Action::ExecRun),
        "bootstrap_repo" => Some(Action::BootstrapRepo),
        _ => None,
    }
}

/// Strips optional ` ```json ` / ` ``` ` fences and returns the outermost
/// `{...}` span, brace-depth aware so nested objects don't truncate it.
fn extract_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    let start = trimmed.find('{')?;
    let mut depth = 0i32;
    for (i, c) in trimmed[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(trimmed[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_mentions_bootstrap_for_empty_repo() {
        let planner = Planner::new();
        let prompt = planner.build_prompt("add a test", Intent::CodeEdit, &[], true);
        assert!(prompt.contains("BOOTSTRAP_REPO"));
    }

    #[test]
    fn test_normalize_confidence_scales_fraction() {
        assert_eq!(normalize_confidence(&serde_json::json!(0.85)), 85);
        assert_eq!(normalize_confidence(&serde_json::json!(85)), 85);
        assert_eq!(normalize_confidence(&serde_json::json!(1.0)), 100);
    }

    #[test]
    fn test_extract_json_object_strips_fences_and_prose() {
        let raw = "here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\nthanks";
        let extracted = extract_json_object(raw).unwrap();
        assert_eq!(extracted, "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn test_parse_full_step_object_plan() {
        let planner = Planner::new();
        let raw = r#"{"confidence": 0.9, "steps": [
            {"step_id": 1, "action": "fs_read", "path": "lib/x.rb", "reason": "inspect"},
            {"step_id": 2, "action": "fs_write", "path": "lib/x.rb", "reason": "fix", "depends_on": [1]}
        ], "rollback_strategy": "git reset"}"#;
        let plan = planner.parse(raw, "fix x", &["lib/x.rb".to_string()]).unwrap();
        assert_eq!(plan.confidence, 90);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec![1]);
        assert_eq!(plan.rollback_strategy, "git reset");
    }

    #[test]
    fn test_parse_coerces_bare_string_steps() {
        let planner = Planner::new();
        let raw = r#"{"confidence": 60, "steps": ["fs_read lib/x.rb: check current state"]}"#;
        let plan = planner.parse(raw, "goal", &[]).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, Action::FsRead);
        assert_eq!(plan.steps[0].reason, "lib/x.rb: check current state");
        assert_eq!(plan.steps[0].step_id, 1);
    }

    #[test]
    fn test_parse_rejects_unrecognized_bare_string_action() {
        let planner = Planner::new();
        let raw = r#"{"confidence": 60, "steps": ["think about it real hard"]}"#;
        assert!(planner.parse(raw, "goal", &[]).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_json_object() {
        let planner = Planner::new();
        assert!(planner.parse("not json at all", "goal", &[]).is_err());
    }
}
