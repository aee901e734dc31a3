use csa_core::AppError;
use csa_llm::{LlmAdapter, LlmParams, ResponseFormat};
use similar::TextDiff;

/// Max changed (`+`/`-`) lines an LLM-produced edit diff may contain before
/// it is rejected (spec.md §4.6).
pub const LINE_CAP: usize = 40;
/// Retries allowed for a malformed edit diff before surfacing a typed error.
pub const MAX_RETRIES: u32 = 2;

/// Produces minimal unified diffs for file creation and editing (spec.md
/// §4.6). Deterministic add-file diffs never touch the LLM; edits do, with
/// a strict validated retry loop.
pub struct DiffGenerator {
    line_cap: usize,
    max_retries: u32,
}

impl Default for DiffGenerator {
    fn default() -> Self {
        Self {
            line_cap: LINE_CAP,
            max_retries: MAX_RETRIES,
        }
    }
}

impl DiffGenerator {
    pub fn new(line_cap: usize, max_retries: u32) -> Self {
        Self { line_cap, max_retries }
    }

    /// Builds `--- /dev/null\n+++ b/<path>\n@@ ... @@\n+...` deterministically
    /// from the given content — no LLM call.
    pub fn add_file_diff(&self, path: &str, content: &str) -> String {
        let diff = TextDiff::from_lines("", content);
        diff.unified_diff()
            .context_radius(3)
            .header("/dev/null", &format!("b/{path}"))
            .to_string()
    }

    /// Calls the developer-role LLM for a minimal edit diff, validating and
    /// retrying on malformed output (spec.md §4.6).
    pub async fn edit_diff(
        &self,
        llm: &dyn LlmAdapter,
        path: &str,
        original: &str,
        goal: &str,
        reason: &str,
    ) -> Result<String, AppError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            let prompt = self.build_prompt(path, original, goal, reason, &last_error);
            let raw = llm
                .query(&prompt, &LlmParams::low_temperature(), ResponseFormat::Text)
                .await?;
            let candidate = strip_fences(&raw);
            match self.validate(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(reason) => {
                    last_error = reason;
                    tracing::warn!(attempt, path, reason = %last_error, "rejected malformed edit diff");
                }
            }
        }
        Err(AppError::ToolRejected {
            tool: "DiffGenerator.edit_diff".to_string(),
            reason: format!("exhausted retries: {last_error}"),
        })
    }

    fn build_prompt(&self, path: &str, original: &str, goal: &str, reason: &str, correction: &str) -> String {
        let correction_note = if correction.is_empty() {
            String::new()
        } else {
            format!("\nYour previous attempt was rejected: {correction}. Correct this and try again.")
        };
        format!(
            "Return ONLY a unified diff for the file `{path}`; at most {} changed lines; \
             no prose, no markdown fences.\n\nGoal: {goal}\nReason for this edit: {reason}\n\n\
             Current file contents:\n{original}{correction_note}",
            self.line_cap
        )
    }

    fn validate(&self, diff: &str) -> Result<(), String> {
        let has_header = diff.contains("diff --git") || diff.contains("---");
        if !has_header {
            return Err("missing a diff --git or --- header".to_string());
        }
        if !diff.contains("@@") {
            return Err("missing an @@ hunk".to_string());
        }
        let changed = diff
            .lines()
            .filter(|l| {
                (l.starts_with('+') && !l.starts_with("+++"))
                    || (l.starts_with('-') && !l.starts_with("---"))
            })
            .count();
        if changed > self.line_cap {
            return Err(format!("{changed} changed lines exceeds cap of {}", self.line_cap));
        }
        if changed == 0 {
            return Err("diff contains no changed lines".to_string());
        }
        Ok(())
    }
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```diff").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim().to_string()
}
