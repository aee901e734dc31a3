use async_trait::async_trait;
use csa_core::AppError;

/// Canonical sampling parameters (spec.md §4.4). Adapters translate the
/// subset their provider understands; unsupported fields are dropped, never
/// silently coerced into the wrong meaning.
#[derive(Clone, Debug, Default)]
pub struct LlmParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
    pub num_predict: Option<u32>,
}

impl LlmParams {
    pub fn low_temperature() -> Self {
        Self {
            temperature: Some(0.1),
            ..Default::default()
        }
    }
}

/// Requested output shape. Adapters that cannot honor `JsonObject` MUST
/// return [`AppError::ProviderUnavailable`]-style failure rather than
/// silently ignoring the request (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// Callback invoked once per non-empty streamed token.
pub type OnToken<'a> = dyn FnMut(&str) + Send + 'a;

/// Uniform interface over heterogeneous LLM providers (spec.md §4.4).
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Blocking completion.
    async fn query(
        &self,
        prompt: &str,
        params: &LlmParams,
        response_format: ResponseFormat,
    ) -> Result<String, AppError>;

    /// Streamed completion; the returned string is the concatenation of all
    /// tokens passed to `on_token`.
    async fn stream(
        &self,
        prompt: &str,
        params: &LlmParams,
        response_format: ResponseFormat,
        on_token: &mut OnToken<'_>,
    ) -> Result<String, AppError>;

    /// Batch embedding of texts into dense vectors.
    async fn embed(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>, AppError>;

    /// Provider name, used in error messages and trace events.
    fn provider_name(&self) -> &'static str;
}
