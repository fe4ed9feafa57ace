//! Weighted fusion of dense-vector and BM25 keyword retrieval.
//!
//! Both branches run over the same chunk set. Keyword ranks are rescaled to
//! [0,1] against the fetched batch and inverted (BM25 is lower-is-better),
//! then fused with the vector score at 0.7/0.3. Results deduplicate on a
//! coarse `source + text prefix` key.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use super::chunker::{split_into_chunks, MemoryChunk};
use super::fts::{FtsIndex, KeywordHit};
use super::vector::{Embedder, VectorStore};

/// Fusion weights.
const VECTOR_WEIGHT: f32 = 0.7;
const KEYWORD_WEIGHT: f32 = 0.3;

/// Vector branch floor.
const VECTOR_MIN_SCORE: f32 = 0.2;

/// Boost added per chat-context term found in a chunk, and its cap. Pinned
/// context nudges ties toward chunks the user has marked as important.
const CONTEXT_TERM_BOOST: f32 = 0.05;
const CONTEXT_BOOST_CAP: f32 = 0.1;

/// A fused retrieval result.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Hybrid retrieval engine over the workspace memory files.
pub struct HybridEngine {
    vector: VectorStore,
    fts: FtsIndex,
}

impl HybridEngine {
    pub fn new(fts_path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self {
            vector: VectorStore::new(embedder),
            fts: FtsIndex::open(fts_path)?,
        })
    }

    #[cfg(test)]
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            vector: VectorStore::new(embedder),
            fts: FtsIndex::open_in_memory().expect("in-memory fts"),
        }
    }

    /// Rebuild both indexes from `(source, markdown)` documents.
    ///
    /// The FTS table repopulates eagerly in one transaction; the vector
    /// cache is invalidated and rebuilds lazily on the next query.
    pub async fn reindex_all(&self, sources: &[(String, String)]) -> Result<usize> {
        let mut chunks: Vec<MemoryChunk> = Vec::new();
        for (source, markdown) in sources {
            chunks.extend(split_into_chunks(source, markdown));
        }

        self.fts.clear()?;
        self.fts.insert_batch(&chunks)?;
        let total = chunks.len();
        self.vector.set_chunks(chunks).await;
        self.vector.invalidate().await;
        debug!("Reindexed {} chunks from {} sources", total, sources.len());
        Ok(total)
    }

    /// Chunk count in the FTS table.
    pub fn indexed_len(&self) -> usize {
        self.fts.len().unwrap_or(0)
    }

    /// Chunk count in the vector cache after a warm rebuild.
    pub async fn vector_len(&self) -> usize {
        self.vector.warm_len().await
    }

    /// Run the fused query. `context` carries the chat's pinned text, used
    /// as a light boost on overlapping chunks.
    pub async fn query(
        &self,
        query: &str,
        top_k: usize,
        context: Option<&str>,
    ) -> Result<Vec<HybridHit>> {
        let fetch = top_k * 2;

        let keyword_hits = match self.fts.search(query, fetch) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Keyword search failed: {}", e);
                Vec::new()
            }
        };
        let vector_hits = self.vector.search(query, fetch, VECTOR_MIN_SCORE).await?;

        let keyword_scores = normalize_keyword_scores(&keyword_hits);

        // Merge per chunk id.
        let mut merged: Vec<HybridHit> = Vec::new();
        let mut index_of: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();

        for hit in &vector_hits {
            index_of.insert(hit.id.clone(), merged.len());
            merged.push(HybridHit {
                id: hit.id.clone(),
                source: hit.source.clone(),
                text: hit.text.clone(),
                score: VECTOR_WEIGHT * hit.score,
            });
        }
        for (hit, keyword_score) in keyword_hits.iter().zip(keyword_scores) {
            match index_of.get(&hit.id) {
                Some(&idx) => merged[idx].score += KEYWORD_WEIGHT * keyword_score,
                None => merged.push(HybridHit {
                    id: hit.id.clone(),
                    source: hit.source.clone(),
                    text: hit.text.clone(),
                    score: KEYWORD_WEIGHT * keyword_score,
                }),
            }
        }

        // Context boost from pinned text.
        if let Some(context) = context {
            let terms: Vec<String> = context
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| t.len() > 2)
                .map(|t| t.to_lowercase())
                .collect();
            for hit in &mut merged {
                let lower = hit.text.to_lowercase();
                let boost: f32 = terms
                    .iter()
                    .filter(|t| lower.contains(t.as_str()))
                    .map(|_| CONTEXT_TERM_BOOST)
                    .sum();
                hit.score += boost.min(CONTEXT_BOOST_CAP);
            }
        }

        // Dedup on source + coarse text prefix, keeping the best score.
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut seen: HashSet<String> = HashSet::new();
        let mut results: Vec<HybridHit> = Vec::new();
        for hit in merged {
            let prefix: String = hit.text.chars().take(100).collect();
            let key = format!("{}|{}", hit.source, prefix);
            if seen.insert(key) {
                results.push(hit);
            }
            if results.len() >= top_k {
                break;
            }
        }
        Ok(results)
    }
}

/// Rescale a keyword batch's BM25 ranks to [0,1] and invert so higher is
/// better. A single-hit batch maps to 1.0.
fn normalize_keyword_scores(hits: &[KeywordHit]) -> Vec<f32> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|h| h.bm25).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|h| h.bm25).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    hits.iter()
        .map(|h| {
            if range <= f64::EPSILON {
                1.0
            } else {
                (1.0 - (h.bm25 - min) / range) as f32
            }
        })
        .collect()
}
