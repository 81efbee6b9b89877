//! Pluggable embedding backends for vector search.
//!
//! Provides a trait-based abstraction over embedding models, with a local
//! hashing embedder (always available, deterministic) and an Ollama API
//! embedder. Embedding failures surface as errors so index construction
//! and retrieval can report them instead of indexing garbage vectors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EmbedError;

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Generate embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the backend name.
    fn provider_name(&self) -> &str;
}

/// Configuration for embedding backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend name: "ollama" (default) or "local".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Backend-specific model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Embedding dimensions (auto-detected from the model if 0).
    #[serde(default)]
    pub dimensions: usize,
    /// Optional base URL override for API backends.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "ollama".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: None,
            dimensions: 0,
            base_url: None,
        }
    }
}

/// Local term-frequency embedder (always available, no external services).
///
/// Deterministic: the same text always hashes to the same vector, which is
/// what the tests and offline runs rely on.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

/// djb2-style string hash used to bucket terms into dimensions.
fn term_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return Ok(vector);
        }

        // Count term frequency
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        // Hash each unique term into a dimension
        for (term, count) in &tf {
            let idx = term_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        // L2 normalize
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Ollama embedder (uses the local Ollama API).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "nomic-embed-text".into());
        let dims = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };
        Self {
            client: reqwest::Client::new(),
            model,
            dims,
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".into()),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::ApiRequest {
                message: format!("POST {} failed: {}", url, e),
            })?;

        if !resp.status().is_success() {
            return Err(EmbedError::ApiRequest {
                message: format!("Ollama returned status {}", resp.status()),
            });
        }

        let json: serde_json::Value =
            resp.json().await.map_err(|e| EmbedError::ResponseParse {
                message: format!("invalid JSON from Ollama: {}", e),
            })?;

        let embedding: Vec<f32> = json["embeddings"][0]
            .as_array()
            .ok_or_else(|| EmbedError::ResponseParse {
                message: "response missing embeddings array".into(),
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.len() != self.dims {
            return Err(EmbedError::Dimensions {
                expected: self.dims,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    match config.provider.as_str() {
        "ollama" => Box::new(OllamaEmbedder::new(
            config.model.clone(),
            config.base_url.clone(),
        )),
        "local" => {
            let dims = if config.dimensions > 0 {
                config.dimensions
            } else {
                128
            };
            Box::new(LocalEmbedder::new(dims))
        }
        other => {
            tracing::warn!(
                "Unknown embedding backend '{}', falling back to local",
                other
            );
            let dims = if config.dimensions > 0 {
                config.dimensions
            } else {
                128
            };
            Box::new(LocalEmbedder::new(dims))
        }
    }
}
