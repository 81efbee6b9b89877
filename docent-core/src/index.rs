//! Persistent vector index over document chunks.
//!
//! The index is a flat in-memory list of embedding/chunk pairs, persisted
//! as a single JSON document per collection. Search is exact cosine
//! similarity over all entries, which is plenty for a single handbook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embeddings::Embedder;
use crate::error::{DocentError, Result};
use crate::persistence;
use crate::types::DocumentChunk;

/// One indexed chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub chunk: DocumentChunk,
}

/// A chunk returned from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// A persisted vector index for one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub collection: String,
    pub provider: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn index_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}.json", collection))
}

impl VectorIndex {
    /// Embed all chunks and build a fresh index.
    ///
    /// Fails with `Build` when there are no chunks or when embedding fails;
    /// a handbook that yields no text cannot answer anything.
    pub async fn build(
        collection: &str,
        chunks: Vec<DocumentChunk>,
        embedder: &dyn Embedder,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(DocentError::Build {
                message: "no text chunks to index".into(),
            });
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| DocentError::Build {
                message: format!("embedding chunks failed: {}", e),
            })?;

        let entries = embeddings
            .into_iter()
            .zip(chunks)
            .map(|(embedding, chunk)| IndexEntry { embedding, chunk })
            .collect::<Vec<_>>();

        tracing::info!(
            "Built vector index '{}' with {} entries",
            collection,
            entries.len()
        );

        Ok(Self {
            collection: collection.to_string(),
            provider: embedder.provider_name().to_string(),
            dimensions: embedder.dimensions(),
            created_at: Utc::now(),
            entries,
        })
    }

    /// Persist the index as `<dir>/<collection>.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = index_path(dir, &self.collection);
        persistence::atomic_write_json(&path, self)?;
        tracing::info!("Saved vector index to {}", path.display());
        Ok(())
    }

    /// Load a previously saved index.
    ///
    /// Returns `None` when the file is missing, unreadable, or not a valid
    /// index document. A stale or corrupt store is indistinguishable from
    /// an absent one; the caller rebuilds in either case.
    pub fn load(dir: &Path, collection: &str) -> Option<Self> {
        let path = index_path(dir, collection);
        match persistence::load_json::<Self>(&path) {
            Ok(Some(index)) => {
                tracing::info!(
                    "Loaded vector index '{}' with {} entries",
                    index.collection,
                    index.entries.len()
                );
                Some(index)
            }
            Ok(None) => {
                tracing::debug!("No vector index at {}", path.display());
                None
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable vector index {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Top-k entries by cosine similarity to the query embedding.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_embedding, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
