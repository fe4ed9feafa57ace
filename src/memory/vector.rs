//! Dense-vector retrieval over memory chunks.
//!
//! The embedding backend is pluggable behind [`Embedder`]; the store only
//! mandates the cosine-similarity contract and the cache-invalidation
//! discipline. Embeddings are cached by content hash so unchanged chunks
//! never re-embed; `invalidate` marks the cache dirty and the rebuild is
//! single-flight on the next query.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::chunker::MemoryChunk;

/// A scored vector match.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Pluggable embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts into fixed-dimension vectors.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic feature-hashing embedder.
///
/// Projects token trigrams into a fixed-dimension space by hashing. No
/// network, stable across runs; adequate for lexical-overlap similarity and
/// the default backend when no external embedding service is configured.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            // Token itself plus character trigrams, for partial-word overlap.
            let mut features = vec![token.clone()];
            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                features.push(window.iter().collect());
            }
            for feature in features {
                let digest = Sha256::digest(feature.as_bytes());
                let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
                    as usize
                    % self.dimensions;
                let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

struct CacheEntry {
    chunk: MemoryChunk,
    hash: String,
    embedding: Vec<f32>,
}

struct VectorState {
    entries: Vec<CacheEntry>,
    /// Embeddings by content hash, reused across rebuilds.
    by_hash: HashMap<String, Vec<f32>>,
    dirty: bool,
}

/// In-memory vector store with a content-hash embedding cache.
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    state: Mutex<VectorState>,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            state: Mutex::new(VectorState {
                entries: Vec::new(),
                by_hash: HashMap::new(),
                dirty: false,
            }),
        }
    }

    /// Replace the chunk set. Embeddings are computed lazily on next query.
    pub async fn set_chunks(&self, chunks: Vec<MemoryChunk>) {
        let mut state = self.state.lock().await;
        state.entries = chunks
            .into_iter()
            .map(|chunk| {
                let hash = content_hash(&chunk.text);
                CacheEntry {
                    chunk,
                    hash,
                    embedding: Vec::new(),
                }
            })
            .collect();
        state.dirty = true;
    }

    /// Mark the cache stale; the next query rebuilds it.
    pub async fn invalidate(&self) {
        self.state.lock().await.dirty = true;
    }

    /// Number of indexed chunks after a warm rebuild.
    pub async fn warm_len(&self) -> usize {
        self.ensure_fresh().await.ok();
        self.state.lock().await.entries.len()
    }

    /// Rebuild embeddings for entries whose hash is not cached.
    ///
    /// Runs under the state lock, so concurrent queries wait rather than
    /// racing duplicate embedding work (single-flight).
    async fn ensure_fresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }

        let missing: Vec<(usize, String)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !state.by_hash.contains_key(&e.hash))
            .map(|(i, e)| (i, e.chunk.text.clone()))
            .collect();

        if !missing.is_empty() {
            debug!("Embedding {} new chunks", missing.len());
            let texts: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            for ((idx, _), embedding) in missing.iter().zip(embeddings) {
                let hash = state.entries[*idx].hash.clone();
                state.by_hash.insert(hash, embedding);
            }
        }

        // Resolve every entry from the hash cache.
        let resolved: Vec<Vec<f32>> = state
            .entries
            .iter()
            .map(|e| state.by_hash.get(&e.hash).cloned().unwrap_or_default())
            .collect();
        for (entry, embedding) in state.entries.iter_mut().zip(resolved) {
            entry.embedding = embedding;
        }

        // Drop cached embeddings for vanished content.
        let live: std::collections::HashSet<String> =
            state.entries.iter().map(|e| e.hash.clone()).collect();
        state.by_hash.retain(|hash, _| live.contains(hash));

        state.dirty = false;
        Ok(())
    }

    /// Cosine search: matches above `min_score`, best first, at most `top_k`.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f32) -> Result<Vec<VectorHit>> {
        self.ensure_fresh().await?;

        let query_texts = vec![query.to_string()];
        let query_embedding = self
            .embedder
            .embed(&query_texts)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let state = self.state.lock().await;
        let mut hits: Vec<VectorHit> = state
            .entries
            .iter()
            .map(|e| VectorHit {
                id: e.chunk.id.clone(),
                source: e.chunk.source.clone(),
                text: e.chunk.text.clone(),
                score: cosine_similarity(&query_embedding, &e.embedding),
            })
            .filter(|h| h.score > min_score)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
