use std::path::{Path, PathBuf};
use std::sync::Arc;

use csa_core::AppError;
use csa_llm::LlmAdapter;
use csa_safety::Safety;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::chunk::chunk_text;
use crate::entry::{content_hash, entry_key, ChunkMetadata, IndexEntry};
use crate::meta::IndexMeta;
use crate::vector_store::{JsonlVectorStore, VectorStore};

const BACKEND_ID: &str = "jsonl-brute-force-cosine";

/// One scored hit returned from [`EmbeddingIndex::retrieve`].
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedChunk {
    pub path: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub files_scanned: usize,
    pub chunks_embedded: usize,
    pub chunks_reused: usize,
    pub chunks_discarded_invalid_vector: usize,
}

/// Maps the repository into retrievable chunks (spec.md §4.2).
pub struct EmbeddingIndex {
    repo_root: PathBuf,
    meta_path: PathBuf,
    store: JsonlVectorStore,
    safety: Safety,
    embed_adapter: Arc<dyn LlmAdapter>,
    embedding_model: String,
    chunk_chars: usize,
    chunk_overlap: usize,
}

impl EmbeddingIndex {
    pub fn open(
        repo_root: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
        meta_path: impl Into<PathBuf>,
        safety: Safety,
        embed_adapter: Arc<dyn LlmAdapter>,
        embedding_model: impl Into<String>,
        chunk_chars: usize,
        chunk_overlap: usize,
    ) -> Result<Self, AppError> {
        Ok(Self {
            repo_root: repo_root.into(),
            meta_path: meta_path.into(),
            store: JsonlVectorStore::open(store_path)?,
            safety,
            embed_adapter,
            embedding_model: embedding_model.into(),
            chunk_chars,
            chunk_overlap,
        })
    }

    /// Walks the repo honoring `.gitignore` and Safety, chunks and embeds
    /// every text file, upserting into the store. When backend metadata on
    /// disk mismatches the current `(embedding_model, dimension)`, the store
    /// is rebuilt (spec.md §4.2) regardless of `force`.
    pub async fn build(&mut self, force: bool) -> Result<BuildStats, AppError> {
        let mut force = force;
        if let Some(dim) = self.current_dimension() {
            let current = IndexMeta {
                backend_id: BACKEND_ID.to_string(),
                embedding_model: self.embedding_model.clone(),
                dimension: dim,
            };
            if let Some(existing) = IndexMeta::load(&self.meta_path)? {
                if !existing.matches(&current) {
                    warn!("embedding backend metadata changed; rebuilding index from scratch");
                    force = true;
                }
            }
        }

        if force {
            self.store.clear()?;
        }

        let mut stats = BuildStats::default();
        let existing_keys: std::collections::HashSet<String> =
            self.store.all().iter().map(|e| e.key.clone()).collect();

        let mut pending_texts = Vec::new();
        let mut pending_meta = Vec::new();

        for entry in WalkBuilder::new(&self.repo_root).hidden(false).build() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.repo_root) else {
                continue;
            };
            let relative_str = relative.to_string_lossy().replace('\\', "/");
            if !self.safety.path_allowed(&relative_str) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable file, skip silently
            };
            stats.files_scanned += 1;
            let mtime = file_mtime(entry.path());

            for (chunk_index, chunk) in
                chunk_text(&text, self.chunk_chars, self.chunk_overlap).into_iter().enumerate()
            {
                let hash = content_hash(&chunk);
                let key = entry_key(&relative_str, chunk_index, &hash);
                if !force && existing_keys.contains(&key) {
                    stats.chunks_reused += 1;
                    continue;
                }
                pending_texts.push(chunk.clone());
                pending_meta.push((key, relative_str.clone(), chunk_index, chunk, mtime));
            }
        }

        if !pending_texts.is_empty() {
            let vectors = self
                .embed_adapter
                .embed(&pending_texts, Some(&self.embedding_model))
                .await?;
            let dimension = vectors.iter().map(|v| v.len()).find(|&l| l > 0).unwrap_or(0);

            let mut upserts = Vec::with_capacity(vectors.len());
            for ((key, path, chunk_index, text, mtime), vector) in pending_meta.into_iter().zip(vectors) {
                if dimension > 0 && vector.len() != dimension {
                    stats.chunks_discarded_invalid_vector += 1;
                    debug!(path, chunk_index, "discarding chunk with wrong-dimension vector");
                    continue;
                }
                stats.chunks_embedded += 1;
                upserts.push(IndexEntry {
                    key,
                    vector,
                    metadata: ChunkMetadata {
                        path,
                        chunk_index,
                        text,
                        mtime,
                    },
                });
            }
            self.store.upsert_many(upserts)?;

            if dimension > 0 {
                IndexMeta {
                    backend_id: BACKEND_ID.to_string(),
                    embedding_model: self.embedding_model.clone(),
                    dimension,
                }
                .save(&self.meta_path)?;
            }
        }

        Ok(stats)
    }

    /// Embeds `query` and returns the top-`limit` chunks by cosine
    /// similarity, stable tie-break on path then chunk_index
    /// (spec.md §4.2). Never throws: a provider failure on an otherwise
    /// empty store still yields `[]`.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Vec<RetrievedChunk> {
        if self.store.all().is_empty() || limit == 0 {
            return Vec::new();
        }
        let Ok(mut vectors) = self.embed_adapter.embed(&[query.to_string()], Some(&self.embedding_model)).await else {
            return Vec::new();
        };
        let Some(query_vector) = vectors.pop() else {
            return Vec::new();
        };
        self.store
            .similar(&query_vector, limit)
            .into_iter()
            .map(|(entry, score)| RetrievedChunk {
                path: entry.metadata.path,
                chunk_index: entry.metadata.chunk_index,
                text: entry.metadata.text,
                score,
            })
            .collect()
    }

    fn current_dimension(&self) -> Option<usize> {
        self.store.all().first().map(|e| e.vector.len())
    }
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
