use std::sync::Arc;

use csa_config::{Config, Provider};
use csa_core::AppError;

use crate::adapter::LlmAdapter;
use crate::ollama::OllamaAdapter;
use crate::openai::OpenAiAdapter;

/// One of the model roles named in spec.md §6
/// (`model`, `planner_model`, `developer_model`, `reviewer_model`,
/// `embed_model`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Default,
    Planner,
    Developer,
    Reviewer,
    Embed,
}

fn model_for(cfg: &Config, role: Role) -> &str {
    match role {
        Role::Default => &cfg.model,
        Role::Planner => &cfg.planner_model,
        Role::Developer => &cfg.developer_model,
        Role::Reviewer => &cfg.reviewer_model,
        Role::Embed => &cfg.embed_model,
    }
}

/// Builds the adapter for `role` from the resolved [`Config`]
/// (spec.md §6 `provider:` selects the default adapter; per-role models
/// override which model name is sent, not which provider).
pub fn build_adapter(cfg: &Config, role: Role) -> Result<Arc<dyn LlmAdapter>, AppError> {
    let model = model_for(cfg, role).to_string();
    match cfg.provider {
        Provider::Ollama => {
            let host = cfg
                .ollama
                .host
                .clone()
                .ok_or_else(|| AppError::Config("ollama.host is not configured".to_string()))?;
            Ok(Arc::new(OllamaAdapter::new(host, model)))
        }
        Provider::Openai => {
            let key = cfg
                .openai
                .api_key
                .clone()
                .ok_or_else(|| AppError::Config("openai.api_key is not configured".to_string()))?;
            Ok(Arc::new(OpenAiAdapter::new(key, model)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_adapter_ollama_default() {
        let cfg = Config::default();
        let adapter = build_adapter(&cfg, Role::Planner).unwrap();
        assert_eq!(adapter.provider_name(), "ollama");
    }

    #[test]
    fn test_build_adapter_openai_requires_api_key() {
        let mut cfg = Config::default();
        cfg.provider = Provider::Openai;
        let err = build_adapter(&cfg, Role::Developer).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_build_adapter_openai_with_key() {
        let mut cfg = Config::default();
        cfg.provider = Provider::Openai;
        cfg.openai.api_key = Some("sk-test".to_string());
        let adapter = build_adapter(&cfg, Role::Reviewer).unwrap();
        assert_eq!(adapter.provider_name(), "openai");
    }
}
