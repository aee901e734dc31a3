use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use csa_core::AppError;

use crate::entry::IndexEntry;

/// Minimal key/value-with-search abstraction (spec.md §4.2). Cosine
/// similarity is the required ranking metric; implementations may back the
/// store with anything.
pub trait VectorStore: Send + Sync {
    fn upsert_many(&mut self, entries: Vec<IndexEntry>) -> Result<(), AppError>;
    fn similar(&self, vector: &[f32], limit: usize) -> Vec<(IndexEntry, f32)>;
    fn all(&self) -> &[IndexEntry];
    fn clear(&mut self) -> Result<(), AppError>;
}

/// JSONL-backed store, consistent with the rest of the workspace's
/// append/rewrite JSONL persistence (`.agent/index.db`). Entries are kept
/// in memory for brute-force cosine-similarity search — appropriate at
/// single-repo scale (spec.md Non-goals exclude distributed/large-scale
/// concerns).
pub struct JsonlVectorStore {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

impl JsonlVectorStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let entries = if path.exists() {
            load_entries(&path)?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    fn persist(&self) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| AppError::Io {
                path: self.path.display().to_string(),
                source: e,
            })?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| AppError::Config(format!("failed to serialize index entry: {e}")))?;
            writeln!(writer, "{line}").map_err(|e| AppError::Io {
                path: self.path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<Vec<IndexEntry>, AppError> {
    let file = File::open(path).map_err(|e| AppError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| AppError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(_) => continue, // a corrupt line is discarded, not fatal
        }
    }
    Ok(entries)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl VectorStore for JsonlVectorStore {
    fn upsert_many(&mut self, entries: Vec<IndexEntry>) -> Result<(), AppError> {
        for entry in entries {
            if let Some(existing) = self.entries.iter_mut().find(|e| e.key == entry.key) {
                *existing = entry;
            } else {
                self.entries.push(entry);
            }
        }
        self.persist()
    }

    fn similar(&self, vector: &[f32], limit: usize) -> Vec<(IndexEntry, f32)> {
        let mut scored: Vec<(IndexEntry, f32)> = self
            .entries
            .iter()
            .filter(|e| e.vector.len() == vector.len())
            .map(|e| (e.clone(), cosine_similarity(&e.vector, vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.metadata.path.cmp(&b.0.metadata.path))
                .then_with(|| a.0.metadata.chunk_index.cmp(&b.0.metadata.chunk_index))
        });
        scored.truncate(limit);
        scored
    }

    fn all(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn clear(&mut self) -> Result<(), AppError> {
        self.entries.clear();
        self.persist()
    }
}
