use async_trait::async_trait;
use csa_core::AppError;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::adapter::{LlmAdapter, LlmParams, OnToken, ResponseFormat};
use crate::stream::LineBuffer;

const DEFAULT_HOST: &str = "https://api.openai.com";
const DONE_MARKER: &str = "[DONE]";

/// Adapter for OpenAI-compatible cloud providers: standard chat-completion
/// request shape, SSE (`data: {...}`) streaming terminated by `[DONE]`.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    host: String,
    api_key: String,
    model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: DEFAULT_HOST.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, prompt: &str, params: &LlmParams, stream: bool, format: ResponseFormat) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = params.max_tokens.or(params.num_predict) {
            body["max_tokens"] = json!(n);
        }
        if let Some(s) = params.seed {
            body["seed"] = json!(s);
        }
        if format == ResponseFormat::JsonObject {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn extract_message(value: &Value) -> Option<String> {
        value
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
            .map(|s| s.to_string())
    }

    fn extract_delta(value: &Value) -> Option<String> {
        value
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .map(|s| s.to_string())
    }

    fn unavailable(&self, message: String) -> AppError {
        AppError::ProviderUnavailable {
            provider: self.provider_name().to_string(),
            host: self.host.clone(),
            message,
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn query(
        &self,
        prompt: &str,
        params: &LlmParams,
        response_format: ResponseFormat,
    ) -> Result<String, AppError> {
        let body = self.request_body(prompt, params, false, response_format);
        let url = format!("{}/v1/chat/completions", self.host.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("invalid JSON response: {e}")))?;
        Self::extract_message(&value).ok_or_else(|| {
            AppError::ProviderUnavailable {
                provider: self.provider_name().to_string(),
                host: self.host.clone(),
                message: "response missing choices[0].message.content".to_string(),
            }
        })
    }

    async fn stream(
        &self,
        prompt: &str,
        params: &LlmParams,
        response_format: ResponseFormat,
        on_token: &mut OnToken<'_>,
    ) -> Result<String, AppError> {
        let body = self.request_body(prompt, params, true, response_format);
        let url = format!("{}/v1/chat/completions", self.host.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let mut stream = resp.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.unavailable(e.to_string()))?;
            for line in buffer.push(&chunk) {
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == DONE_MARKER {
                    return Ok(full);
                }
                let value: Value = match serde_json::from_str(payload) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(token) = Self::extract_delta(&value) {
                    if !token.is_empty() {
                        on_token(&token);
                        full.push_str(&token);
                    }
                }
            }
        }
        Ok(full)
    }

    async fn embed(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
        let model = model.unwrap_or("text-embedding-3-small");
        let url = format!("{}/v1/embeddings", self.host.trim_end_matches('/'));
        let body = json!({ "model": model, "input": texts });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("invalid JSON response: {e}")))?;
        let data = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::ProviderUnavailable {
                provider: self.provider_name().to_string(),
                host: self.host.clone(),
                message: "response missing data field".to_string(),
            })?;
        Ok(data
            .iter()
            .filter_map(|d| d.get("embedding"))
            .map(|e| {
                e.as_array()
                    .map(|a| a.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
                    .unwrap_or_default()
            })
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
