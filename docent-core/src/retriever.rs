//! Multi-query retrieval over the vector index.
//!
//! Distance-based similarity search is sensitive to how a question is
//! phrased, so the retriever asks the language model for several
//! rephrasings of the question and merges the search results. When the
//! rephrasing call fails it degrades to a single direct search; the
//! degradation is counted so operators can see it happening.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embeddings::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::llm::LlmProvider;
use crate::types::{CompletionRequest, DocumentChunk, Message};

const MULTI_QUERY_TEMPLATE: &str = "You are an AI language model assistant. Your task is to generate five \
different versions of the given user question to retrieve relevant documents from \
a vector database. By generating multiple perspectives on the user question, your \
goal is to help the user overcome some of the limitations of the distance-based \
similarity search. Provide these alternative questions separated by newlines.\n\
Original question: {question}";

/// Seam for retrieval strategies, stubbed in chain and mediator tests.
#[async_trait]
pub trait Retrieve: Send + Sync {
    /// Return chunks relevant to the question, most relevant first.
    async fn retrieve(&self, question: &str) -> Result<Vec<DocumentChunk>>;
}

/// Retriever that searches with LLM-generated rephrasings of the question.
pub struct MultiQueryRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    provider: Arc<dyn LlmProvider>,
    top_k: usize,
    fallbacks: AtomicU64,
}

impl MultiQueryRetriever {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        provider: Arc<dyn LlmProvider>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            provider,
            top_k,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of times rephrasing failed and retrieval fell back to a
    /// single direct search.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Ask the model for alternative phrasings of the question.
    async fn rephrase(&self, question: &str) -> Result<Vec<String>> {
        let prompt = MULTI_QUERY_TEMPLATE.replace("{question}", question);
        let request = CompletionRequest::from_messages(vec![Message::user(prompt)]);
        let response = self.provider.complete(request).await?;

        let queries: Vec<String> = response
            .message
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(5)
            .map(String::from)
            .collect();

        debug!(count = queries.len(), "Generated question rephrasings");
        Ok(queries)
    }

    async fn search_one(&self, query: &str) -> Result<Vec<DocumentChunk>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(crate::error::DocentError::from)?;
        Ok(self
            .index
            .search(&embedding, self.top_k)
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }
}

#[async_trait]
impl Retrieve for MultiQueryRetriever {
    async fn retrieve(&self, question: &str) -> Result<Vec<DocumentChunk>> {
        let queries = match self.rephrase(question).await {
            Ok(queries) if !queries.is_empty() => queries,
            Ok(_) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!("Rephrasing produced no queries; falling back to direct search");
                vec![question.to_string()]
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Rephrasing failed; falling back to direct search");
                vec![question.to_string()]
            }
        };

        // First-seen wins so the merged set is stable with respect to the
        // order the rephrasings came back in.
        let mut seen: HashSet<String> = HashSet::new();
        let mut merged = Vec::new();
        for query in &queries {
            for chunk in self.search_one(query).await? {
                if seen.insert(chunk.text.clone()) {
                    merged.push(chunk);
                }
            }
        }

        debug!(
            queries = queries.len(),
            chunks = merged.len(),
            "Retrieval complete"
        );
        Ok(merged)
    }
}
