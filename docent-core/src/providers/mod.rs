//! LLM provider implementations.

pub mod ollama;

pub use ollama::OllamaProvider;

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, MockLlmProvider};

/// Create an LLM provider based on configuration.
///
/// Unknown provider names fall back to the mock provider so the service
/// still starts; a warning records the substitution.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match config.provider.as_str() {
        "ollama" => Arc::new(OllamaProvider::new(config)),
        "mock" => Arc::new(MockLlmProvider::new()),
        other => {
            tracing::warn!("Unknown LLM provider '{}', falling back to mock", other);
            Arc::new(MockLlmProvider::new())
        }
    }
}
