//! Full-text index over memory chunks, backed by SQLite FTS5.
//!
//! The index lives in a sidecar file next to the memory files
//! (`memory/.fts-index.db`) and ranks with `bm25()`, lower is better.
//! Batch updates run inside a single transaction.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use super::chunker::MemoryChunk;

/// Sidecar filename inside the memory directory.
pub const FTS_INDEX_FILENAME: &str = ".fts-index.db";

/// A keyword match with its raw BM25 rank (lower = better).
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub source: String,
    pub text: String,
    pub bm25: f64,
}

/// SQLite-FTS5 keyword index.
pub struct FtsIndex {
    conn: Mutex<Connection>,
}

impl FtsIndex {
    /// Open or create the index file.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create index directory")?;
        }
        let conn = Connection::open(db_path).context("Failed to open FTS index")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks USING fts5(
                chunk_id UNINDEXED,
                source UNINDEXED,
                content,
                tokenize='unicode61'
            );
            "#,
        )
        .context("Failed to initialize FTS schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory index for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks USING fts5(
                chunk_id UNINDEXED,
                source UNINDEXED,
                content,
                tokenize='unicode61'
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Remove every indexed chunk.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("fts lock");
        conn.execute("DELETE FROM chunks", [])?;
        Ok(())
    }

    /// Insert a batch of chunks inside one transaction.
    pub fn insert_batch(&self, chunks: &[MemoryChunk]) -> Result<()> {
        let mut conn = self.conn.lock().expect("fts lock");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (chunk_id, source, content) VALUES (?1, ?2, ?3)",
            )?;
            for chunk in chunks {
                stmt.execute(params![chunk.id, chunk.source, chunk.text])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("fts lock");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Keyword search returning up to `limit` hits ranked by BM25.
    ///
    /// The raw query is normalized first; an empty normalized query yields
    /// no hits rather than an FTS syntax error.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().expect("fts lock");
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, source, content, bm25(chunks) AS rank
            FROM chunks
            WHERE chunks MATCH ?1
            ORDER BY rank
            LIMIT ?2
            "#,
        )?;
        let hits = stmt
            .query_map(params![normalized, limit as i64], |row| {
                Ok(KeywordHit {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    text: row.get(2)?,
                    bm25: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }
}

/// Normalize a user query for FTS5.
///
/// Strips everything but alphanumerics and Hangul, splits on whitespace,
/// quotes each token, and joins with OR so any term can match.
pub fn normalize_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || ('\u{AC00}'..='\u{D7A3}').contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .map(|token| format!("\"{}\"", token))
        .collect::<Vec<_>>()
        .join(" OR ")
}
