use std::path::Path;

use csa_core::AppError;
use serde::{Deserialize, Serialize};

/// `provider:` key (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    Openai,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Ollama
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_allow")]
    pub allow: Vec<String>,
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,
    #[serde(default = "default_program_allowlist")]
    pub program_allowlist: Vec<String>,
}

fn default_allow() -> Vec<String> {
    vec!["**/*".to_string()]
}

/// Project-specific glob denies, layered on top of csa-safety's hardcoded
/// system-deny regexes (`.git/`, `.env`, private keys, ...). Empty by
/// default: the system-deny list already covers the restrictive baseline
/// spec.md §4.1 asks for.
fn default_deny() -> Vec<String> {
    Vec::new()
}

fn default_program_allowlist() -> Vec<String> {
    vec![
        "git".to_string(),
        "rspec".to_string(),
        "rubocop".to_string(),
        "cargo".to_string(),
        "npm".to_string(),
        "pytest".to_string(),
    ]
}

impl SafetyConfig {
    fn defaults() -> Self {
        Self {
            allow: default_allow(),
            deny: default_deny(),
            program_allowlist: default_program_allowlist(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoConfig {
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
}

fn default_max_cycles() -> u32 {
    6
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            dry_run: false,
            max_cycles: default_max_cycles(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_limit")]
    pub limit: usize,
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_retrieval_limit() -> usize {
    8
}
fn default_chunk_chars() -> usize {
    1500
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_retrieval_limit(),
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
}

/// Fully-resolved configuration (spec.md §6 `.agent.yml`). Every field has a
/// default so a repo with no config file at all still runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub provider: Provider,
    pub model: String,
    pub planner_model: String,
    pub developer_model: String,
    pub reviewer_model: String,
    pub embed_model: String,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
    pub safety: SafetyConfig,
    pub auto: AutoConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: "llama3".to_string(),
            planner_model: "llama3".to_string(),
            developer_model: "llama3".to_string(),
            reviewer_model: "llama3".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            ollama: OllamaConfig {
                host: Some("http://localhost:11434".to_string()),
            },
            openai: OpenAiConfig::default(),
            safety: SafetyConfig::defaults(),
            auto: AutoConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

/// Partial config as read from a YAML file; every field optional so a layer
/// only overrides what it actually sets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub planner_model: Option<String>,
    pub developer_model: Option<String>,
    pub reviewer_model: Option<String>,
    pub embed_model: Option<String>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAiConfig>,
    pub safety: Option<PartialSafety>,
    pub auto: Option<PartialAuto>,
    pub retrieval: Option<PartialRetrieval>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialSafety {
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
    pub program_allowlist: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialAuto {
    pub test_command: Option<String>,
    pub dry_run: Option<bool>,
    pub max_cycles: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialRetrieval {
    pub limit: Option<usize>,
    pub chunk_chars: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

impl PartialConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(content).map_err(|e| AppError::Config(format!("invalid YAML: {e}")))
    }

    pub fn load_file(path: &Path) -> Result<Option<Self>, AppError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| AppError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Some(Self::from_yaml_str(&content)?))
    }
}

/// Applies a [`PartialConfig`] layer on top of the accumulated config,
/// overriding only the fields the layer actually set. Callers apply layers
/// from lowest to highest precedence: defaults, repo config, user config,
/// env vars, then CLI flags (spec.md §6 precedence).
pub fn apply_layer(base: &mut Config, layer: PartialConfig) {
    if let Some(v) = layer.provider {
        base.provider = v;
    }
    if let Some(v) = layer.model {
        base.model = v;
    }
    if let Some(v) = layer.planner_model {
        base.planner_model = v;
    }
    if let Some(v) = layer.developer_model {
        base.developer_model = v;
    }
    if let Some(v) = layer.reviewer_model {
        base.reviewer_model = v;
    }
    if let Some(v) = layer.embed_model {
        base.embed_model = v;
    }
    if let Some(v) = layer.ollama {
        if v.host.is_some() {
            base.ollama.host = v.host;
        }
    }
    if let Some(v) = layer.openai {
        if v.api_key.is_some() {
            base.openai.api_key = v.api_key;
        }
    }
    if let Some(v) = layer.safety {
        if let Some(allow) = v.allow {
            base.safety.allow = allow;
        }
        if let Some(deny) = v.deny {
            base.safety.deny = deny;
        }
        if let Some(pa) = v.program_allowlist {
            base.safety.program_allowlist = pa;
        }
    }
    if let Some(v) = layer.auto {
        if let Some(tc) = v.test_command {
            base.auto.test_command = Some(tc);
        }
        if let Some(dr) = v.dry_run {
            base.auto.dry_run = dr;
        }
        if let Some(mc) = v.max_cycles {
            base.auto.max_cycles = mc;
        }
    }
    if let Some(v) = layer.retrieval {
        if let Some(l) = v.limit {
            base.retrieval.limit = l;
        }
        if let Some(c) = v.chunk_chars {
            base.retrieval.chunk_chars = c;
        }
        if let Some(o) = v.chunk_overlap {
            base.retrieval.chunk_overlap = o;
        }
    }
}

/// Builds a [`PartialConfig`] layer from the recognized environment
/// variables (spec.md §6): `OLLAMA_HOST`, `OPENAI_ACCESS_TOKEN`.
/// `AGENT_CHAT_SYSTEM_PROMPT` is consumed by the Orchestrator directly, not
/// modeled here.
pub fn env_layer() -> PartialConfig {
    let mut layer = PartialConfig::default();
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        layer.ollama = Some(OllamaConfig { host: Some(host) });
    }
    if let Ok(key) = std::env::var("OPENAI_ACCESS_TOKEN") {
        layer.openai = Some(OpenAiConfig {
            api_key: Some(key),
        });
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_allows_everything_and_denies_nothing_extra() {
        // The restrictive baseline (.git/, .env, private keys, ...) lives in
        // csa-safety's hardcoded system-deny list, not here.
        let cfg = Config::default();
        assert_eq!(cfg.safety.allow, vec!["**/*".to_string()]);
        assert!(cfg.safety.deny.is_empty());
        assert!(!cfg.safety.program_allowlist.is_empty());
    }

    #[test]
    fn test_apply_layer_overrides_only_set_fields() {
        let mut cfg = Config::default();
        let layer = PartialConfig {
            model: Some("qwen2.5-coder".into()),
            ..Default::default()
        };
        apply_layer(&mut cfg, layer);
        assert_eq!(cfg.model, "qwen2.5-coder");
        // planner_model untouched
        assert_eq!(cfg.planner_model, "llama3");
    }

    #[test]
    fn test_precedence_repo_then_user_then_env_then_cli() {
        let mut cfg = Config::default();
        apply_layer(
            &mut cfg,
            PartialConfig {
                model: Some("from-repo".into()),
                ..Default::default()
            },
        );
        apply_layer(
            &mut cfg,
            PartialConfig {
                model: Some("from-user".into()),
                ..Default::default()
            },
        );
        assert_eq!(cfg.model, "from-user");
        apply_layer(
            &mut cfg,
            PartialConfig {
                model: Some("from-cli".into()),
                ..Default::default()
            },
        );
        assert_eq!(cfg.model, "from-cli");
    }

    #[test]
    fn test_partial_config_parses_yaml() {
        let yaml = r#"
provider: openai
model: gpt-4o-mini
safety:
  allow: ["src/**"]
auto:
  max_cycles: 3
"#;
        let partial = PartialConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(partial.provider, Some(Provider::Openai));
        assert_eq!(partial.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(partial.auto.unwrap().max_cycles, Some(3));
    }

    #[test]
    fn test_load_file_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".agent.yml");
        assert!(PartialConfig::load_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_env_layer_reads_ollama_host() {
        // SAFETY: test runs single-threaded w.r.t. this env var; no other
        // test in this crate reads or writes OLLAMA_HOST.
        unsafe {
            std::env::set_var("OLLAMA_HOST", "http://example.test:11434");
        }
        let layer = env_layer();
        assert_eq!(
            layer.ollama.unwrap().host.as_deref(),
            Some("http://example.test:11434")
        );
        unsafe {
            std::env::remove_var("OLLAMA_HOST");
        }
    }
}
