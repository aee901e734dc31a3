use std::path::Path;

use csa_core::AppError;
use serde::{Deserialize, Serialize};

/// Backend fingerprint persisted next to the vector store
/// (`.agent/index.meta.json`, spec.md §4.2). If this mismatches on load the
/// store is rebuilt from scratch to avoid mixing vectors from different
/// embedding models/dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub backend_id: String,
    pub embedding_model: String,
    pub dimension: usize,
}

impl IndexMeta {
    pub fn load(path: &Path) -> Result<Option<Self>, AppError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| AppError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        match serde_json::from_str(&content) {
            Ok(meta) => Ok(Some(meta)),
            Err(_) => Ok(None), // corrupt meta is treated as "no meta" -> rebuild
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("failed to serialize index meta: {e}")))?;
        std::fs::write(path, content).map_err(|e| AppError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn matches(&self, other: &IndexMeta) -> bool {
        self == other
    }
}
