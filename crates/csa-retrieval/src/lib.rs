//! Per-goal retrieval with caching and skip policy (spec.md §4.3).

use std::path::{Path, PathBuf};

use csa_core::Intent;
use csa_embed::EmbeddingIndex;
use tracing::warn;

/// Why retrieval produced an empty file set, when it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    RepoEmpty,
    IntentDoesNotNeedRetrieval,
    IndexUnavailable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::RepoEmpty => "repo_empty",
            SkipReason::IntentDoesNotNeedRetrieval => "intent_does_not_need_retrieval",
            SkipReason::IndexUnavailable => "index_unavailable",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalResult {
    pub files: Vec<String>,
    pub cached: bool,
    pub skip_reason: Option<SkipReason>,
}

impl RetrievalResult {
    /// True when a mandatory-retrieval intent nonetheless produced no files;
    /// callers should emit `retrieval_required_but_skipped` (spec.md §4.3).
    pub fn required_but_skipped(&self, intent: Intent) -> bool {
        intent.requires_retrieval() && self.files.is_empty()
    }
}

struct CacheEntry {
    goal: String,
    result: RetrievalResult,
}

/// Ordered workspace directories scanned for exact-filename augmentation
/// (spec.md §4.3, `devagent` Open Questions note).
pub const DEFAULT_WORKSPACE_DIRS: &[&str] = &["playground", "lib", "src", "app", "spec", "test"];

pub struct RetrievalController {
    repo_root: PathBuf,
    workspace_dirs: Vec<String>,
    cache: Option<CacheEntry>,
}

impl RetrievalController {
    pub fn new(repo_root: impl Into<PathBuf>, workspace_dirs: Vec<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            workspace_dirs,
            cache: None,
        }
    }

    pub fn with_default_dirs(repo_root: impl Into<PathBuf>) -> Self {
        Self::new(
            repo_root,
            DEFAULT_WORKSPACE_DIRS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Retrieves files relevant to `goal`, honoring the skip policy and a
    /// per-goal cache. `index` is `None` when the index is unavailable
    /// (build failed, provider unreachable).
    pub async fn retrieve_for_goal(
        &mut self,
        goal: &str,
        intent: Intent,
        limit: usize,
        index: Option<&EmbeddingIndex>,
        repo_is_empty: bool,
    ) -> RetrievalResult {
        if let Some(cached) = &self.cache {
            if cached.goal == goal {
                let mut result = cached.result.clone();
                result.cached = true;
                return result;
            }
        }

        let result = self.compute(goal, intent, limit, index, repo_is_empty).await;
        self.cache = Some(CacheEntry {
            goal: goal.to_string(),
            result: result.clone(),
        });
        result
    }

    async fn compute(
        &self,
        goal: &str,
        intent: Intent,
        limit: usize,
        index: Option<&EmbeddingIndex>,
        repo_is_empty: bool,
    ) -> RetrievalResult {
        if repo_is_empty {
            return RetrievalResult {
                files: Vec::new(),
                cached: false,
                skip_reason: Some(SkipReason::RepoEmpty),
            };
        }
        if !intent.requires_retrieval() && !worth_retrieving_anyway(intent) {
            return RetrievalResult {
                files: Vec::new(),
                cached: false,
                skip_reason: Some(SkipReason::IntentDoesNotNeedRetrieval),
            };
        }
        let Some(index) = index else {
            if intent.requires_retrieval() {
                warn!(%intent, "retrieval_required_but_skipped: index unavailable");
            }
            return RetrievalResult {
                files: Vec::new(),
                cached: false,
                skip_reason: Some(SkipReason::IndexUnavailable),
            };
        };

        let semantic_hits = index.retrieve(goal, limit).await;
        let mut semantic_paths: Vec<String> =
            semantic_hits.into_iter().map(|h| h.path).collect();
        dedup_preserve_order(&mut semantic_paths);

        let exact_matches = self.exact_filename_matches(goal);

        // Exact matches rank above semantic results (spec.md §4.3).
        let mut files = exact_matches;
        for path in semantic_paths {
            if !files.contains(&path) {
                files.push(path);
            }
        }
        files.truncate(limit);

        RetrievalResult {
            files,
            cached: false,
            skip_reason: None,
        }
    }

    /// Scans the configured ordered workspace directories for files whose
    /// basename is mentioned literally in `goal`.
    fn exact_filename_matches(&self, goal: &str) -> Vec<String> {
        let mut matches = Vec::new();
        for dir in &self.workspace_dirs {
            let dir_path = self.repo_root.join(dir);
            let Ok(read_dir) = std::fs::read_dir(&dir_path) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let Ok(file_type) = entry.file_type() else { continue };
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if goal.contains(name.as_ref()) {
                    if let Ok(relative) = entry.path().strip_prefix(&self.repo_root) {
                        matches.push(relative.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        matches
    }
}

fn worth_retrieving_anyway(_intent: Intent) -> bool {
    false
}

fn dedup_preserve_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// True if `path` was referenced verbatim in `prompt`, satisfying the
/// validator's literal-path exception for mandatory-retrieval intents
/// (spec.md §4.7).
pub fn mentioned_literally(prompt: &str, path: &Path) -> bool {
    let Some(name) = path.to_str() else { return false };
    prompt.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use csa_config::config::SafetyConfig;
    use csa_core::AppError;
    use csa_llm::{LlmAdapter, LlmParams, OnToken, ResponseFormat};
    use csa_safety::Safety;
    use std::sync::Arc;

    struct FakeEmbedder;

    #[async_trait]
    impl LlmAdapter for FakeEmbedder {
        async fn query(&self, _: &str, _: &LlmParams, _: ResponseFormat) -> Result<String, AppError> {
            unimplemented!()
        }
        async fn stream(&self, _: &str, _: &LlmParams, _: ResponseFormat, _: &mut OnToken<'_>) -> Result<String, AppError> {
            unimplemented!()
        }
        async fn embed(&self, texts: &[String], _model: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
        fn provider_name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_skips_with_repo_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RetrievalController::with_default_dirs(dir.path());
        let result = controller
            .retrieve_for_goal("do something", Intent::CodeEdit, 5, None, true)
            .await;
        assert_eq!(result.skip_reason, Some(SkipReason::RepoEmpty));
        assert!(result.files.is_empty());
    }

    #[tokio::test]
    async fn test_skips_non_mandatory_intent() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RetrievalController::with_default_dirs(dir.path());
        let result = controller
            .retrieve_for_goal("what is a monad", Intent::Qna, 5, None, false)
            .await;
        assert_eq!(result.skip_reason, Some(SkipReason::IntentDoesNotNeedRetrieval));
    }

    #[tokio::test]
    async fn test_mandatory_intent_with_no_index_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RetrievalController::with_default_dirs(dir.path());
        let result = controller
            .retrieve_for_goal("fix the bug", Intent::Debug, 5, None, false)
            .await;
        assert_eq!(result.skip_reason, Some(SkipReason::IndexUnavailable));
        assert!(result.required_but_skipped(Intent::Debug));
    }

    #[tokio::test]
    async fn test_cache_hit_for_repeated_goal() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RetrievalController::with_default_dirs(dir.path());
        let first = controller
            .retrieve_for_goal("fix the bug", Intent::Debug, 5, None, false)
            .await;
        assert!(!first.cached);
        let second = controller
            .retrieve_for_goal("fix the bug", Intent::Debug, 5, None, false)
            .await;
        assert!(second.cached);
    }

    #[tokio::test]
    async fn test_exact_filename_match_ranks_above_semantic_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/widget.rb"), "class Widget; end").unwrap();
        std::fs::write(dir.path().join("other.rb"), "def greeting; 'hi'; end").unwrap();

        let embedder: Arc<dyn LlmAdapter> = Arc::new(FakeEmbedder);
        let safety = Safety::new(
            dir.path(),
            &SafetyConfig {
                allow: vec!["**/*".into()],
                deny: vec![],
                program_allowlist: vec![],
            },
        );
        let mut index = csa_embed::EmbeddingIndex::open(
            dir.path(),
            dir.path().join(".agent/index.db"),
            dir.path().join(".agent/index.meta.json"),
            safety,
            embedder,
            "fake-model",
            1500,
            200,
        )
        .unwrap();
        index.build(false).await.unwrap();

        let mut controller = RetrievalController::with_default_dirs(dir.path());
        let result = controller
            .retrieve_for_goal("please fix widget.rb", Intent::Debug, 5, Some(&index), false)
            .await;
        assert_eq!(result.skip_reason, None);
        assert_eq!(result.files.first().map(String::as_str), Some("lib/widget.rb"));
    }

    #[test]
    fn test_mentioned_literally() {
        assert!(mentioned_literally("please edit lib/widget.rb now", Path::new("lib/widget.rb")));
        assert!(!mentioned_literally("please edit something else", Path::new("lib/widget.rb")));
    }
}
