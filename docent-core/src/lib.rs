//! # Docent Core
//!
//! Core library for the Docent handbook assistant. Provides PDF text
//! extraction, chunking, the persistent vector index, retrieval-augmented
//! answer streaming, the mediator orchestration layer, chat sessions, and
//! the HTTP service layer.

pub mod chain;
pub mod chunk;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod mediator;
pub mod persistence;
pub mod providers;
pub mod retriever;
pub mod server;
pub mod session;
pub mod types;

// Re-export commonly used types at the crate root.
pub use chain::AnswerChain;
pub use chunk::Chunker;
pub use config::{load_config, DocentConfig, LlmConfig, RagConfig, ServerConfig, UploadsConfig};
pub use documents::DocumentStore;
pub use embeddings::{create_embedder, Embedder, EmbeddingConfig, LocalEmbedder, OllamaEmbedder};
pub use error::{DocentError, EmbedError, LlmError, Result};
pub use index::{IndexEntry, ScoredChunk, VectorIndex};
pub use llm::{LlmProvider, MockLlmProvider};
pub use mediator::{Mediator, MediatorState};
pub use providers::{create_provider, OllamaProvider};
pub use retriever::{MultiQueryRetriever, Retrieve};
pub use server::{router, AppState, SharedState};
pub use session::ChatSession;
pub use types::{
    CompletionRequest, CompletionResponse, DocumentChunk, Message, Role, StreamEvent, TokenUsage,
};
