use csa_core::Intent;
use csa_llm::{LlmAdapter, LlmParams, ResponseFormat};
use serde::Deserialize;
use tracing::warn;

const GREETING_FAST_PATH: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "cool", "great", "sounds good"];

/// Classifies a goal into one of spec.md §4.9's six intents. Cheap
/// deterministic branches are tried before spending a model round-trip,
/// the same ordering the teacher prefers for pattern resolution.
pub struct IntentClassifier;

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Returns `(intent, confidence)`. Falls back to `(QNA, 0.4)` on an
    /// unparseable model response rather than failing the goal outright —
    /// intent classification errors are recoverable, not fatal.
    pub async fn classify(&self, llm: &dyn LlmAdapter, goal: &str) -> (Intent, f64) {
        if let Some(intent) = self.fast_path(goal) {
            return (intent, 0.99);
        }

        let prompt = format!(
            "Classify the following user message as exactly one of EXPLAIN, CODE_EDIT, DEBUG, \
             CODE_REVIEW, QNA, or REJECT. REJECT means the request should not be acted on \
             (destructive, out of scope, or abusive). Respond with ONLY a JSON object: \
             {{\"intent\": \"...\", \"confidence\": 0.0-1.0}}.\n\nMessage: {goal}"
        );
        match llm.query(&prompt, &LlmParams::low_temperature(), ResponseFormat::JsonObject).await {
            Ok(raw) => parse_classification(&raw).unwrap_or_else(|| {
                warn!(%raw, "unparseable intent classification response; defaulting to QNA");
                (Intent::Qna, 0.4)
            }),
            Err(err) => {
                warn!(error = %err, "intent classification call failed; defaulting to QNA");
                (Intent::Qna, 0.3)
            }
        }
    }

    fn fast_path(&self, goal: &str) -> Option<Intent> {
        let normalized = goal.trim().trim_end_matches(['.', '!']).to_ascii_lowercase();
        if GREETING_FAST_PATH.contains(&normalized.as_str()) {
            Some(Intent::Qna)
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    confidence: f64,
}

fn parse_classification(raw: &str) -> Option<(Intent, f64)> {
    let trimmed = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let parsed: RawClassification = serde_json::from_str(trimmed).ok()?;
    let intent = match parsed.intent.to_ascii_uppercase().as_str() {
        "EXPLAIN" => Intent::Explain,
        "CODE_EDIT" => Intent::CodeEdit,
        "DEBUG" => Intent::Debug,
        "CODE_REVIEW" => Intent::CodeReview,
        "QNA" => Intent::Qna,
        "REJECT" => Intent::Reject,
        _ => return None,
    };
    let confidence = if parsed.confidence > 0.0 { parsed.confidence } else { 0.5 };
    Some((intent, confidence.clamp(0.0, 1.0)))
}
