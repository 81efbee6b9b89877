//! Error types for the Docent core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering LLM providers, embeddings, index construction, and input
//! validation.

use std::path::PathBuf;

/// Top-level error type for the Docent core library.
#[derive(Debug, thiserror::Error)]
pub enum DocentError {
    #[error("Document not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Index build failed: {message}")]
    Build { message: String },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from embedding backends.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Embedding request failed: {message}")]
    ApiRequest { message: String },

    #[error("Embedding response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimensions { expected: usize, actual: usize },
}

/// A type alias for results using the top-level `DocentError`.
pub type Result<T> = std::result::Result<T, DocentError>;
