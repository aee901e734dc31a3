use serde::{Deserialize, Serialize};

/// Per-chunk metadata stored alongside its embedding (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub path: String,
    pub chunk_index: usize,
    pub text: String,
    pub mtime: i64,
}

/// One retrievable unit: a chunk's embedding plus its metadata.
/// `EmbeddingIndex` exclusively mutates; every other component only reads
/// (spec.md §3 ownership note).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// `hash(path + chunk_index + content_hash)` per spec.md §4.2, used as the
/// entry's unique upsert key so unchanged chunks don't churn on rebuild.
pub fn entry_key(path: &str, chunk_index: usize, content_hash: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_is_stable_for_same_input() {
        let a = entry_key("lib/x.rb", 0, "abc");
        let b = entry_key("lib/x.rb", 0, "abc");
        assert_eq!(a, b);
    }

    #[test]
    fn test_entry_key_changes_with_chunk_index() {
        let a = entry_key("lib/x.rb", 0, "abc");
        let b = entry_key("lib/x.rb", 1, "abc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_key_changes_with_content_hash() {
        let a = entry_key("lib/x.rb", 0, "abc");
        let b = entry_key("lib/x.rb", 0, "def");
        assert_ne!(a, b);
    }
}
