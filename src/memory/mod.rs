//! Hybrid memory retrieval: chunking, dense vectors, and keyword search.

pub mod chunker;
pub mod fts;
pub mod hybrid;
pub mod vector;

pub use chunker::{split_into_chunks, MemoryChunk, CHUNK_SOFT_LIMIT};
pub use fts::{FtsIndex, KeywordHit, FTS_INDEX_FILENAME};
pub use hybrid::{HybridEngine, HybridHit};
pub use vector::{cosine_similarity, Embedder, HashingEmbedder, VectorStore};
