use std::path::{Path, PathBuf};
use std::sync::Arc;

use csa_config::config::{PartialConfig, Provider};
use csa_config::Config;
use csa_core::AppError;
use csa_embed::EmbeddingIndex;
use csa_llm::{build_adapter, LlmAdapter, Role};
use csa_orchestrator::HardStopConfig;
use csa_safety::Safety;
use csa_tools::ToolBus;
use csa_trace::{EventBus, SessionMemory, Tracer};
use tracing::warn;

/// Process-wide composition root: resolves configuration once and builds
/// every long-lived service a goal run needs (spec.md §2 `Context`).
pub struct Context {
    pub repo_root: PathBuf,
    pub config: Config,
    pub safety: Safety,
    pub tool_bus: ToolBus,
    pub event_bus: Arc<EventBus>,
    pub tracer: Tracer,
    pub session_memory: SessionMemory,
    pub classifier_llm: Arc<dyn LlmAdapter>,
    pub planner_llm: Arc<dyn LlmAdapter>,
    pub developer_llm: Arc<dyn LlmAdapter>,
    pub embed_llm: Arc<dyn LlmAdapter>,
    pub index: Option<EmbeddingIndex>,
}

impl Context {
    /// Resolves config (repo → user → env → CLI precedence), then builds
    /// Safety, the ToolBus, tracing sinks, and per-role LLM adapters.
    /// Building the embedding index is best-effort: a down provider yields
    /// `index: None` rather than failing the whole command (spec.md §4.3
    /// `IndexUnavailable`).
    pub async fn build(repo_root: impl Into<PathBuf>, cli_overrides: PartialConfig) -> Result<Self, AppError> {
        let repo_root = repo_root.into();
        let config = csa_config::resolve(&repo_root, cli_overrides)?;

        let safety = Safety::new(&repo_root, &config.safety);
        let event_bus = Arc::new(EventBus::new());
        let tool_bus = ToolBus::new(&repo_root, safety.clone(), event_bus.clone());

        let tracer = Tracer::new(csa_config::paths::traces_jsonl(&repo_root));
        tracer.attach(&event_bus);
        let session_memory = SessionMemory::new(csa_config::paths::session_jsonl(&repo_root));

        let classifier_llm = build_adapter(&config, Role::Default)?;
        let planner_llm = build_adapter(&config, Role::Planner)?;
        let developer_llm = build_adapter(&config, Role::Developer)?;
        let embed_llm = build_adapter(&config, Role::Embed)?;

        let index = open_index(&repo_root, &config, safety.clone(), embed_llm.clone()).await;

        Ok(Self {
            repo_root,
            config,
            safety,
            tool_bus,
            event_bus,
            tracer,
            session_memory,
            classifier_llm,
            planner_llm,
            developer_llm,
            embed_llm,
            index,
        })
    }

    pub fn hard_stops(&self) -> HardStopConfig {
        HardStopConfig {
            max_cycles: self.config.auto.max_cycles,
            ..HardStopConfig::default()
        }
    }

    pub fn provider_host(&self) -> String {
        match self.config.provider {
            Provider::Ollama => self.config.ollama.host.clone().unwrap_or_default(),
            Provider::Openai => "https://api.openai.com".to_string(),
        }
    }
}

async fn open_index(
    repo_root: &Path,
    config: &Config,
    safety: Safety,
    embed_llm: Arc<dyn LlmAdapter>,
) -> Option<EmbeddingIndex> {
    let index = EmbeddingIndex::open(
        repo_root,
        csa_config::paths::index_db(repo_root),
        csa_config::paths::index_meta_json(repo_root),
        safety,
        embed_llm,
        &config.embed_model,
        config.retrieval.chunk_chars,
        config.retrieval.chunk_overlap,
    );
    let mut index = match index {
        Ok(index) => index,
        Err(err) => {
            warn!(error = %err, "failed to open embedding index");
            return None;
        }
    };
    if let Err(err) = index.build(false).await {
        warn!(error = %err, "embedding index build failed; retrieval will run without it");
        return None;
    }
    Some(index)
}
