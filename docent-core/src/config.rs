//! Configuration system for Docent.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment. Configuration is loaded from `docent.toml` in the working
//! directory (or an explicit path) and `DOCENT_`-prefixed environment
//! variables with `__` section nesting (e.g. `DOCENT_RAG__TOP_K`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embeddings::EmbeddingConfig;

/// Top-level configuration for the Docent service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocentConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub rag: RagConfig,
    pub uploads: UploadsConfig,
    pub server: ServerConfig,
}

/// Configuration for the chat language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "ollama" or "mock".
    pub provider: String,
    /// Model identifier (e.g., "llama3.1:8b").
    pub model: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Default temperature for generation.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "llama3.1:8b".into(),
            base_url: None,
            temperature: 0.7,
        }
    }
}

/// Configuration for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Directory holding the source handbook.
    pub knowledge_dir: PathBuf,
    /// Directory holding the persisted vector index.
    pub index_dir: PathBuf,
    /// Collection name the index is stored under.
    pub collection: String,
    /// Filename of the handbook inside `knowledge_dir`.
    pub source_document: String,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters of trailing context carried into the next chunk.
    pub chunk_overlap: usize,
    /// Number of chunks returned per similarity search.
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: PathBuf::from("knowledge"),
            index_dir: PathBuf::from("knowledge/vector_store"),
            collection: "handbook_vector_store".into(),
            source_document: "handbook.pdf".into(),
            chunk_size: 1200,
            chunk_overlap: 300,
            top_k: 4,
        }
    }
}

/// Configuration for the document upload store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Directory uploaded documents are written to.
    pub dir: PathBuf,
    /// Allowed file extensions, lowercase, with leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            allowed_extensions: [".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl DocentConfig {
    /// Validate the configuration and return any warnings.
    ///
    /// Returns human-readable warning messages for problematic values;
    /// does not error so an odd config still starts the service.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.rag.chunk_size == 0 {
            warnings.push("rag.chunk_size is 0 — chunking will produce nothing useful".to_string());
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            warnings.push(format!(
                "rag.chunk_overlap ({}) >= rag.chunk_size ({}) — overlap will be clamped",
                self.rag.chunk_overlap, self.rag.chunk_size
            ));
        }
        if self.rag.top_k == 0 {
            warnings.push("rag.top_k is 0 — retrieval will never return documents".to_string());
        }
        if self.uploads.allowed_extensions.is_empty() {
            warnings.push("uploads.allowed_extensions is empty — all uploads will be rejected".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            warnings.push(format!(
                "llm.temperature {} is outside the usual 0.0–2.0 range",
                self.llm.temperature
            ));
        }

        warnings
    }

    /// Create the directories the service needs at startup.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.rag.knowledge_dir)?;
        std::fs::create_dir_all(&self.rag.index_dir)?;
        std::fs::create_dir_all(&self.uploads.dir)?;
        Ok(())
    }
}

/// Load configuration from all layers.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `DOCENT_`)
/// 2. Config file (`docent.toml` in the working directory, or `config_path`)
/// 3. Built-in defaults
pub fn load_config(config_path: Option<&Path>) -> Result<DocentConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DocentConfig::default()));

    match config_path {
        Some(path) => {
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default_path = Path::new("docent.toml");
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }
    }

    // Environment variables (DOCENT_LLM__MODEL, DOCENT_RAG__TOP_K, etc.)
    figment = figment.merge(Env::prefixed("DOCENT_").split("__"));

    figment.extract().map_err(Box::new)
}
