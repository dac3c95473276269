use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::utils::similarity::cosine_similarity;

/// One embedded document chunk with its provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub source: String,
    pub page: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Chunk id derived from provenance plus a random salt, so re-ingesting
/// the same page never collides with earlier chunks.
pub fn chunk_identity(source: &str, page: usize) -> String {
    let salt: u64 = rand::random();
    let digest = Sha256::digest(format!("{source}_{page}_{salt:016x}").as_bytes());
    hex::encode(digest)
}

/// In-memory similarity index over embedded chunks. Append-only; this
/// core never deletes or compacts chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunks: Vec<IndexedChunk>) {
        self.chunks.extend(chunks);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    /// Top-K most similar chunks for the query embedding, best first.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Vec<(f32, &IndexedChunk)> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                match cosine_similarity(query_embedding, &chunk.embedding) {
                    Ok(score) => Some((score, chunk)),
                    Err(err) => {
                        warn!("Skipping chunk {}: {}", chunk.chunk_id, err);
                        None
                    }
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Filesystem persistence of one index per (session, conversation).
/// Directory existence is the only "RAG has been built" signal.
#[derive(Clone)]
pub struct VectorIndexStore {
    root: PathBuf,
}

impl VectorIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Deterministic location for one (session, conversation) pair.
    pub fn index_dir(&self, session_id: &str, conversation_id: &str) -> PathBuf {
        self.root
            .join(format!("{session_id}_{conversation_id}_vector_store"))
    }

    fn index_file(dir: &Path) -> PathBuf {
        dir.join("index.json")
    }

    pub fn exists(&self, session_id: &str, conversation_id: &str) -> bool {
        self.index_dir(session_id, conversation_id).exists()
    }

    pub fn load(&self, session_id: &str, conversation_id: &str) -> Result<VectorIndex> {
        let dir = self.index_dir(session_id, conversation_id);
        let file = Self::index_file(&dir);

        let raw = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read vector index at {:?}", file))?;
        let index: VectorIndex =
            serde_json::from_str(&raw).context("Failed to parse vector index")?;

        debug!("Loaded vector index {:?} ({} chunks)", dir, index.len());
        Ok(index)
    }

    /// Persist only after the in-memory index is fully updated: write to a
    /// temp file in the same directory, then rename over the live file, so
    /// a failed build never clobbers the previous index.
    pub fn persist(
        &self,
        session_id: &str,
        conversation_id: &str,
        index: &VectorIndex,
    ) -> Result<()> {
        let dir = self.index_dir(session_id, conversation_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create index directory {:?}", dir))?;

        let file = Self::index_file(&dir);
        let staging = dir.join("index.json.tmp");

        let raw = serde_json::to_string(index).context("Failed to serialize vector index")?;
        fs::write(&staging, raw)
            .with_context(|| format!("Failed to write staging index {:?}", staging))?;
        fs::rename(&staging, &file)
            .with_context(|| format!("Failed to move staging index into place at {:?}", file))?;

        info!("Persisted vector index {:?} ({} chunks)", dir, index.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk_id: id.to_string(),
            source: "doc.pdf".to_string(),
            page: 1,
            content: format!("content of {}", id),
            embedding,
        }
    }

    #[test]
    fn test_chunk_identity_is_salted() {
        let a = chunk_identity("doc.pdf", 3);
        let b = chunk_identity("doc.pdf", 3);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index.append(vec![
            chunk("far", vec![0.0, 1.0]),
            chunk("near", vec![1.0, 0.0]),
            chunk("middle", vec![1.0, 1.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1.chunk_id, "near");
        assert_eq!(hits[1].1.chunk_id, "middle");
    }

    #[test]
    fn test_search_skips_mismatched_dimensions() {
        let mut index = VectorIndex::new();
        index.append(vec![chunk("bad", vec![1.0, 0.0, 0.0]), chunk("good", vec![1.0, 0.0])]);

        let hits = index.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.chunk_id, "good");
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorIndexStore::new(dir.path());

        assert!(!store.exists("s1", "c1"));

        let mut index = VectorIndex::new();
        index.append(vec![chunk("a", vec![0.5, 0.5])]);
        store.persist("s1", "c1", &index).unwrap();

        assert!(store.exists("s1", "c1"));
        let loaded = store.load("s1", "c1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.chunks()[0].chunk_id, "a");
    }

    #[test]
    fn test_append_then_repersist_keeps_old_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorIndexStore::new(dir.path());

        let mut index = VectorIndex::new();
        index.append(vec![chunk("first", vec![1.0, 0.0])]);
        store.persist("s1", "c1", &index).unwrap();

        let mut reloaded = store.load("s1", "c1").unwrap();
        reloaded.append(vec![chunk("second", vec![0.0, 1.0])]);
        store.persist("s1", "c1", &reloaded).unwrap();

        let final_index = store.load("s1", "c1").unwrap();
        assert_eq!(final_index.len(), 2);
        // The chunk retrievable before the second ingest is still retrievable.
        let hits = final_index.search(&[1.0, 0.0], 1);
        assert_eq!(hits[0].1.chunk_id, "first");
    }

    #[test]
    fn test_load_missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorIndexStore::new(dir.path());
        assert!(store.load("s1", "missing").is_err());
    }

    #[test]
    fn test_distinct_pairs_get_distinct_directories() {
        let store = VectorIndexStore::new("/tmp/idx");
        assert_ne!(store.index_dir("s1", "c1"), store.index_dir("s1", "c2"));
        assert_ne!(store.index_dir("s1", "c1"), store.index_dir("s2", "c1"));
    }
}
