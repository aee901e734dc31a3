use async_trait::async_trait;
use csa_core::AppError;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::adapter::{LlmAdapter, LlmParams, OnToken, ResponseFormat};
use crate::stream::LineBuffer;

/// Adapter for Ollama-compatible local inference servers. Wire shape:
/// line-delimited JSON with `{message:{content}}` or `{response}` fields;
/// `done:true` terminates the stream (spec.md §6 "Wire").
pub struct OllamaAdapter {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaAdapter {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            model: model.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn request_body(&self, prompt: &str, params: &LlmParams, stream: bool, format: ResponseFormat) -> Value {
        let mut options = serde_json::Map::new();
        if let Some(t) = params.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(p) = params.top_p {
            options.insert("top_p".into(), json!(p));
        }
        if let Some(n) = params.num_predict.or(params.max_tokens) {
            options.insert("num_predict".into(), json!(n));
        }
        if let Some(s) = params.seed {
            options.insert("seed".into(), json!(s));
        }

        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": options,
        });
        if format == ResponseFormat::JsonObject {
            body["format"] = json!("json");
        }
        body
    }

    fn extract_token(value: &Value) -> Option<String> {
        if let Some(s) = value.get("response").and_then(Value::as_str) {
            return Some(s.to_string());
        }
        value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }

    fn is_done(value: &Value) -> bool {
        value.get("done").and_then(Value::as_bool).unwrap_or(false)
    }
}

#[async_trait]
impl LlmAdapter for OllamaAdapter {
    async fn query(
        &self,
        prompt: &str,
        params: &LlmParams,
        response_format: ResponseFormat,
    ) -> Result<String, AppError> {
        let body = self.request_body(prompt, params, false, response_format);
        let url = format!("{}/api/generate", self.host.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("invalid JSON response: {e}")))?;
        Self::extract_token(&value).ok_or_else(|| {
            AppError::ProviderUnavailable {
                provider: self.provider_name().to_string(),
                host: self.host.clone(),
                message: "response missing response/message.content field".to_string(),
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
        let url = format!("{}/api/generate", self.host.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
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
                let value: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(token) = Self::extract_token(&value) {
                    if !token.is_empty() {
                        on_token(&token);
                        full.push_str(&token);
                    }
                }
                if Self::is_done(&value) {
                    return Ok(full);
                }
            }
        }
        Ok(full)
    }

    async fn embed(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
        let model = model.unwrap_or(&self.model);
        let url = format!("{}/api/embed", self.host.trim_end_matches('/'));
        let body = json!({ "model": model, "input": texts });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("invalid JSON response: {e}")))?;
        let embeddings = value
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::ProviderUnavailable {
                provider: self.provider_name().to_string(),
                host: self.host.clone(),
                message: "response missing embeddings field".to_string(),
            })?;
        Ok(embeddings
            .iter()
            .map(|e| {
                e.as_array()
                    .map(|a| a.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
                    .unwrap_or_default()
            })
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }
}

impl OllamaAdapter {
    fn unavailable(&self, message: String) -> AppError {
        AppError::ProviderUnavailable {
            provider: self.provider_name().to_string(),
            host: self.host.clone(),
            message,
        }
    }
}
