//! Repository embedding index: chunking, vector storage, and cosine
//! similarity retrieval (spec.md §4.2).

mod chunk;
mod entry;
mod index;
mod meta;
mod vector_store;

pub use chunk::chunk_text;
pub use entry::{content_hash, entry_key, ChunkMetadata, IndexEntry};
pub use index::{BuildStats, EmbeddingIndex, RetrievedChunk};
pub use meta::IndexMeta;
pub use vector_store::{cosine_similarity, JsonlVectorStore, VectorStore};
