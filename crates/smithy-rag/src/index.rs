// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-project vector index over files the agent has read or written.
//!
//! Chunks are stored in SQLite with the full-file hash they were computed
//! from; `full_sync` rehashes every indexed path before each turn so
//! command-made and external edits never leave stale vectors behind.
//!
//! Without an embeddings client (no API key) the index degrades to hash
//! tracking: sync bookkeeping still works, retrieval returns nothing.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use smithy_model::EmbeddingsClient;

use crate::chunker::chunk_text;

/// Files above this size are not indexed.
const MAX_INDEXED_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct RagChunk {
    pub path: String,
    pub chunk_id: i64,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub reindexed: Vec<String>,
    pub removed: Vec<String>,
}

pub struct RagIndex {
    db_path: PathBuf,
    workdir: PathBuf,
    embedder: Option<EmbeddingsClient>,
    /// Serializes mutations; reads go straight to SQLite.
    write_lock: Mutex<()>,
}

impl RagIndex {
    pub fn open(
        workdir: &Path,
        rag_dir: &Path,
        embedder: Option<EmbeddingsClient>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(rag_dir)
            .with_context(|| format!("creating {}", rag_dir.display()))?;
        let db_path = rag_dir.join("index.sqlite");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                path      TEXT NOT NULL,
                chunk_id  INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                content   TEXT NOT NULL,
                vector    BLOB NOT NULL,
                PRIMARY KEY (path, chunk_id)
            );
            "#,
        )?;
        Ok(Self {
            db_path,
            workdir: workdir.to_path_buf(),
            embedder,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> anyhow::Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("opening {}", self.db_path.display()))
    }

    /// Index (or re-index) one workdir-relative path.
    ///
    /// Unreadable, binary, and oversized files are removed from the index
    /// instead: whatever was there before no longer matches the disk.
    pub async fn index_file(&self, rel_path: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.index_file_locked(rel_path).await
    }

    async fn index_file_locked(&self, rel_path: &str) -> anyhow::Result<()> {
        let disk = self.workdir.join(rel_path);
        match std::fs::metadata(&disk) {
            Ok(m) if m.is_file() && m.len() <= MAX_INDEXED_BYTES => {}
            _ => return self.remove_file_locked(rel_path),
        }
        let bytes = std::fs::read(&disk)?;
        if bytes[..bytes.len().min(4096)].contains(&0u8) {
            return self.remove_file_locked(rel_path);
        }

        let text = String::from_utf8_lossy(&bytes);
        let file_hash = hash_bytes(&bytes);
        let chunks = chunk_text(&text);

        let vectors = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => {
                match embedder.embed(&chunks).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(path = %rel_path, "embedding failed, indexing hashes only: {e}");
                        vec![Vec::new(); chunks.len()]
                    }
                }
            }
            _ => vec![Vec::new(); chunks.len()],
        };

        let conn = self.conn()?;
        conn.execute("DELETE FROM chunks WHERE path = ?1", params![rel_path])?;
        for (i, (content, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            conn.execute(
                "INSERT INTO chunks (path, chunk_id, file_hash, content, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![rel_path, i as i64, file_hash, content, vector_to_blob(vector)],
            )?;
        }
        debug!(path = %rel_path, chunks = chunks.len(), "indexed");
        Ok(())
    }

    pub async fn remove_file(&self, rel_path: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.remove_file_locked(rel_path)
    }

    fn remove_file_locked(&self, rel_path: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM chunks WHERE path = ?1", params![rel_path])?;
        Ok(())
    }

    /// Re-index a batch of paths (used after restore).
    pub async fn reindex_paths(&self, rel_paths: &[String]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in rel_paths {
            self.index_file_locked(path).await?;
        }
        Ok(())
    }

    /// Reconcile the whole index against the working tree: re-index paths
    /// whose file hash changed, drop paths whose file vanished.
    pub async fn full_sync(&self) -> anyhow::Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = SyncReport::default();

        for (path, stored_hash) in self.indexed_hashes()? {
            let disk = self.workdir.join(&path);
            match std::fs::read(&disk) {
                Ok(bytes) => {
                    if hash_bytes(&bytes) != stored_hash {
                        self.index_file_locked(&path).await?;
                        report.reindexed.push(path);
                    }
                }
                Err(_) => {
                    self.remove_file_locked(&path)?;
                    report.removed.push(path);
                }
            }
        }

        if !report.reindexed.is_empty() || !report.removed.is_empty() {
            debug!(
                reindexed = report.reindexed.len(),
                removed = report.removed.len(),
                "rag sync"
            );
        }
        Ok(report)
    }

    /// Distinct indexed paths with their stored full-file hash.
    pub fn indexed_hashes(&self) -> anyhow::Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT path, file_hash FROM chunks")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Top-k chunks by cosine similarity to `query`.  Returns nothing when
    /// no embeddings client is configured.
    pub async fn query(&self, query: &str, k: usize) -> anyhow::Result<Vec<RagChunk>> {
        let embedder = match &self.embedder {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let query_vecs = embedder.embed(&[query.to_string()]).await?;
        let query_vec = match query_vecs.first() {
            Some(v) if !v.is_empty() => v.clone(),
            _ => return Ok(Vec::new()),
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path, chunk_id, content, vector FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut scored: Vec<RagChunk> = Vec::new();
        for row in rows {
            let (path, chunk_id, content, blob) = row?;
            let vector = blob_to_vector(&blob);
            if vector.is_empty() {
                continue;
            }
            scored.push(RagChunk {
                path,
                chunk_id,
                content,
                score: cosine(&query_vec, &vector),
            });
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
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

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, RagIndex) {
        let dir = tempfile::tempdir().unwrap();
        let rag_dir = dir.path().join(".agentsmithy/rag");
        let index = RagIndex::open(dir.path(), &rag_dir, None).unwrap();
        (dir, index)
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[tokio::test]
    async fn index_tracks_file_hash() {
        let (dir, index) = setup();
        write(dir.path(), "main.py", "print('hi')\n");
        index.index_file("main.py").await.unwrap();
        let hashes = index.indexed_hashes().unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].0, "main.py");
    }

    #[tokio::test]
    async fn full_sync_reindexes_changed_files() {
        let (dir, index) = setup();
        write(dir.path(), "a.py", "v1\n");
        index.index_file("a.py").await.unwrap();
        let before = index.indexed_hashes().unwrap()[0].1.clone();

        write(dir.path(), "a.py", "v2\n");
        let report = index.full_sync().await.unwrap();
        assert_eq!(report.reindexed, vec!["a.py"]);
        let after = index.indexed_hashes().unwrap()[0].1.clone();
        assert_ne!(before, after);

        // A second sync with no changes is a no-op.
        let quiet = index.full_sync().await.unwrap();
        assert!(quiet.reindexed.is_empty());
        assert!(quiet.removed.is_empty());
    }

    #[tokio::test]
    async fn full_sync_drops_missing_files() {
        let (dir, index) = setup();
        write(dir.path(), "gone.py", "x\n");
        index.index_file("gone.py").await.unwrap();
        std::fs::remove_file(dir.path().join("gone.py")).unwrap();

        let report = index.full_sync().await.unwrap();
        assert_eq!(report.removed, vec!["gone.py"]);
        assert!(index.indexed_hashes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_file_clears_chunks() {
        let (dir, index) = setup();
        write(dir.path(), "b.py", "y\n");
        index.index_file("b.py").await.unwrap();
        index.remove_file("b.py").await.unwrap();
        assert!(index.indexed_hashes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn binary_files_are_not_indexed() {
        let (dir, index) = setup();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3]).unwrap();
        index.index_file("blob.bin").await.unwrap();
        assert!(index.indexed_hashes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_without_embedder_returns_empty() {
        let (dir, index) = setup();
        write(dir.path(), "c.py", "z\n");
        index.index_file("c.py").await.unwrap();
        assert!(index.query("anything", 5).await.unwrap().is_empty());
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn vector_blob_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }
}
