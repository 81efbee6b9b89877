//! Orchestration of the retrieval-augmented chat pipeline.
//!
//! The `Mediator` owns the language model handle and the lazily built
//! retrieval resources (vector index, retriever, answer chain). It is
//! constructed once at startup and shared via `Arc`; initialization is
//! serialized behind a lock so racing first requests cannot trigger
//! duplicate index builds. Streaming never writes shared state, so any
//! number of streams may run concurrently.
//!
//! Every failure that happens inside a running stream is converted into a
//! single in-band text fragment here and nowhere else; streams never
//! propagate errors past the channel boundary.

use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::chain::AnswerChain;
use crate::chunk::Chunker;
use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::{DocentError, Result};
use crate::extract::extract_pages;
use crate::index::VectorIndex;
use crate::llm::LlmProvider;
use crate::retriever::{MultiQueryRetriever, Retrieve};
use crate::types::{CompletionRequest, Message, Role, StreamEvent};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_DEGRADED: u8 = 3;

/// Lifecycle state of the RAG resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediatorState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
}

impl MediatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediatorState::Uninitialized => "uninitialized",
            MediatorState::Initializing => "initializing",
            MediatorState::Ready => "ready",
            MediatorState::Degraded => "degraded",
        }
    }
}

/// RAG resources populated by initialization, read-shared afterwards.
struct RagResources {
    index: Arc<VectorIndex>,
    retriever: Arc<MultiQueryRetriever>,
    chain: Arc<AnswerChain>,
}

/// Process-wide orchestrator for direct and retrieval-grounded streaming.
pub struct Mediator {
    provider: Arc<dyn LlmProvider>,
    embedder: Arc<dyn Embedder>,
    rag: RagConfig,
    state: AtomicU8,
    init_lock: Mutex<()>,
    resources: RwLock<Option<RagResources>>,
}

impl Mediator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        rag: RagConfig,
    ) -> Self {
        Self {
            provider,
            embedder,
            rag,
            state: AtomicU8::new(STATE_UNINITIALIZED),
            init_lock: Mutex::new(()),
            resources: RwLock::new(None),
        }
    }

    pub fn state(&self) -> MediatorState {
        match self.state.load(Ordering::Acquire) {
            STATE_INITIALIZING => MediatorState::Initializing,
            STATE_READY => MediatorState::Ready,
            STATE_DEGRADED => MediatorState::Degraded,
            _ => MediatorState::Uninitialized,
        }
    }

    /// Number of chunks in the loaded index, 0 when RAG is unavailable.
    pub async fn indexed_chunks(&self) -> usize {
        self.resources
            .read()
            .await
            .as_ref()
            .map(|r| r.index.len())
            .unwrap_or(0)
    }

    /// Times the retriever fell back to direct search (see `retriever`).
    pub async fn retriever_fallbacks(&self) -> u64 {
        self.resources
            .read()
            .await
            .as_ref()
            .map(|r| r.retriever.fallback_count())
            .unwrap_or(0)
    }

    /// Build or load the vector index and construct retriever and chain.
    ///
    /// Idempotent and serialized: once resources exist this returns
    /// immediately, and concurrent callers queue on the initialization
    /// lock so only one build runs. A failed attempt leaves the mediator
    /// Degraded; a later call retries the build.
    pub async fn initialize_resources(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;

        if self.resources.read().await.is_some() {
            debug!("RAG resources already initialized");
            return Ok(());
        }

        self.state.store(STATE_INITIALIZING, Ordering::Release);
        match self.build_or_load().await {
            Ok(resources) => {
                *self.resources.write().await = Some(resources);
                self.state.store(STATE_READY, Ordering::Release);
                info!("RAG resources initialized");
                Ok(())
            }
            Err(e) => {
                self.state.store(STATE_DEGRADED, Ordering::Release);
                error!(error = %e, "RAG initialization failed; direct streaming remains available");
                Err(e)
            }
        }
    }

    async fn build_or_load(&self) -> Result<RagResources> {
        let index = match VectorIndex::load(&self.rag.index_dir, &self.rag.collection) {
            Some(index)
                if !index.is_empty()
                    && index.provider == self.embedder.provider_name()
                    && index.dimensions == self.embedder.dimensions() =>
            {
                index
            }
            Some(stale) => {
                warn!(
                    provider = %stale.provider,
                    dimensions = stale.dimensions,
                    "Persisted index does not match the configured embedder; rebuilding"
                );
                self.build_index().await?
            }
            None => {
                info!("No usable vector index found; building from the handbook");
                self.build_index().await?
            }
        };

        let index = Arc::new(index);
        let retriever = Arc::new(MultiQueryRetriever::new(
            Arc::clone(&index),
            Arc::clone(&self.embedder),
            Arc::clone(&self.provider),
            self.rag.top_k,
        ));
        let chain = Arc::new(AnswerChain::new(
            Arc::clone(&retriever) as Arc<dyn Retrieve>,
            Arc::clone(&self.provider),
        ));

        Ok(RagResources {
            index,
            retriever,
            chain,
        })
    }

    /// Run the full build pipeline: extract, chunk, embed, persist.
    async fn build_index(&self) -> Result<VectorIndex> {
        let source = self.rag.knowledge_dir.join(&self.rag.source_document);
        let pages = extract_pages(&source)?;

        let chunker = Chunker::new(self.rag.chunk_size, self.rag.chunk_overlap);
        let chunks = chunker.split_pages(&self.rag.source_document, &pages);
        if chunks.is_empty() {
            return Err(DocentError::Build {
                message: format!("{} produced no text chunks", self.rag.source_document),
            });
        }
        info!(chunks = chunks.len(), "Handbook split for indexing");

        let index =
            VectorIndex::build(&self.rag.collection, chunks, self.embedder.as_ref()).await?;
        index.save(&self.rag.index_dir)?;
        Ok(index)
    }

    /// Stream a response for the conversation, grounded or direct.
    ///
    /// Returns the receiving end of a bounded channel; the producer task
    /// stops promptly when the receiver is dropped. The stream is finite
    /// and cannot be consumed twice since the receiver is moved out.
    pub fn stream(
        self: &Arc<Self>,
        conversation: Vec<Message>,
        use_rag: bool,
    ) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let mediator = Arc::clone(self);
        tokio::spawn(async move {
            if use_rag {
                mediator.stream_rag(conversation, tx).await;
            } else {
                mediator.stream_direct(conversation, tx).await;
            }
        });
        rx
    }

    /// The one place a stream-time error becomes user-visible text.
    fn error_fragment(detail: impl std::fmt::Display) -> Bytes {
        Bytes::from(format!("Error during response generation: {}\n", detail))
    }

    async fn stream_rag(&self, conversation: Vec<Message>, tx: mpsc::Sender<Bytes>) {
        // Lazy re-check: a degraded or never-initialized mediator retries
        // the build once per request while resources are absent.
        if self.resources.read().await.is_none() {
            let _ = self.initialize_resources().await;
        }

        let chain = self
            .resources
            .read()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.chain));
        let Some(chain) = chain else {
            error!("Answer chain unavailable; cannot serve RAG request");
            let _ = tx
                .send(Bytes::from_static(b"Error: Chain is not initialized.\n"))
                .await;
            return;
        };

        let question = conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());
        let Some(question) = question else {
            let _ = tx
                .send(Self::error_fragment("conversation has no user message"))
                .await;
            return;
        };

        info!("Using RAG to generate the response");
        let (frag_tx, mut frag_rx) = mpsc::channel::<String>(32);
        let run = tokio::spawn(async move { chain.run(&question, frag_tx).await });

        while let Some(fragment) = frag_rx.recv().await {
            if tx.send(Bytes::from(fragment)).await.is_err() {
                debug!("Stream consumer went away during RAG response");
                return;
            }
        }

        match run.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Answer chain failed");
                let _ = tx.send(Self::error_fragment(e)).await;
            }
            Err(e) => {
                error!(error = %e, "Answer chain task panicked");
                let _ = tx.send(Self::error_fragment("internal error")).await;
            }
        }
    }

    async fn stream_direct(&self, conversation: Vec<Message>, tx: mpsc::Sender<Bytes>) {
        info!("Using LLM directly to generate the response");
        let request = CompletionRequest::from_messages(conversation);
        let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(32);
        let provider = Arc::clone(&self.provider);
        let generation =
            tokio::spawn(async move { provider.complete_streaming(request, event_tx).await });

        while let Some(event) = event_rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    if token.is_empty() {
                        debug!("Skipping empty stream fragment");
                        continue;
                    }
                    if tx.send(Bytes::from(token)).await.is_err() {
                        debug!("Stream consumer went away during direct response");
                        return;
                    }
                }
                StreamEvent::Done { usage } => {
                    debug!(tokens = usage.total(), "Direct response completed");
                    break;
                }
                StreamEvent::Error(message) => {
                    error!(error = %message, "Provider reported stream error");
                    let _ = tx.send(Self::error_fragment(message)).await;
                    return;
                }
            }
        }

        if let Ok(Err(e)) = generation.await {
            error!(error = %e, "Direct streaming failed");
            let _ = tx.send(Self::error_fragment(e)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbedder;
    use crate::error::EmbedError;
    use crate::llm::MockLlmProvider;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Embedder wrapper counting how often the index path is exercised.
    struct CountingEmbedder {
        inner: LocalEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: LocalEmbedder::new(64),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn provider_name(&self) -> &str {
            "local"
        }
    }

    fn rag_config(dir: &TempDir) -> RagConfig {
        RagConfig {
            knowledge_dir: dir.path().join("knowledge"),
            index_dir: dir.path().join("vector_store"),
            ..RagConfig::default()
        }
    }

    fn degraded_setup() -> (Arc<Mediator>, TempDir) {
        // No handbook on disk, so any build attempt fails
        let dir = TempDir::new().unwrap();
        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("direct answer")),
            Arc::new(LocalEmbedder::new(64)),
            rag_config(&dir),
        ));
        (mediator, dir)
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut fragments = Vec::new();
        while let Some(b) = rx.recv().await {
            fragments.push(String::from_utf8(b.to_vec()).unwrap());
        }
        fragments
    }

    #[tokio::test]
    async fn test_initialize_without_document_degrades() {
        let (mediator, _dir) = degraded_setup();
        assert_eq!(mediator.state(), MediatorState::Uninitialized);

        let err = mediator.initialize_resources().await.unwrap_err();
        assert!(matches!(err, DocentError::NotFound { .. }));
        assert_eq!(mediator.state(), MediatorState::Degraded);
        assert_eq!(mediator.indexed_chunks().await, 0);
    }

    #[tokio::test]
    async fn test_degraded_rag_stream_yields_single_error_fragment() {
        let (mediator, _dir) = degraded_setup();
        let _ = mediator.initialize_resources().await;

        let rx = mediator.stream(vec![Message::user("What is the PTO policy?")], true);
        let fragments = collect(rx).await;
        assert_eq!(fragments, vec!["Error: Chain is not initialized.\n".to_string()]);
    }

    #[tokio::test]
    async fn test_direct_stream_works_while_degraded() {
        let (mediator, _dir) = degraded_setup();
        let _ = mediator.initialize_resources().await;

        let rx = mediator.stream(vec![Message::user("hello")], false);
        let fragments = collect(rx).await;
        assert_eq!(fragments.concat(), "direct answer ");
    }

    #[tokio::test]
    async fn test_direct_stream_never_touches_embedder() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder::new());
        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("plain reply")),
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            rag_config(&dir),
        ));

        let rx = mediator.stream(vec![Message::user("hi")], false);
        let _ = collect(rx).await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mediator.state(), MediatorState::Uninitialized);
    }

    #[tokio::test]
    async fn test_rag_stream_without_user_message_errors_in_band() {
        let dir = TempDir::new().unwrap();
        // Pre-build a valid index so the chain exists
        let embedder = LocalEmbedder::new(64);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![crate::types::DocumentChunk::new("some policy text")],
            &embedder,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("answer")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));
        mediator.initialize_resources().await.unwrap();

        let rx = mediator.stream(vec![Message::assistant("orphan turn")], true);
        let fragments = collect(rx).await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("Error during response generation:"));
    }

    #[tokio::test]
    async fn test_loads_persisted_index_instead_of_rebuilding() {
        let dir = TempDir::new().unwrap();
        let embedder = LocalEmbedder::new(64);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![
                crate::types::DocumentChunk::new("Vacation accrues monthly"),
                crate::types::DocumentChunk::new("Badges must be worn on site"),
            ],
            &embedder,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        // No handbook PDF exists, so this only succeeds via load
        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("ok")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));
        mediator.initialize_resources().await.unwrap();
        assert_eq!(mediator.state(), MediatorState::Ready);
        assert_eq!(mediator.indexed_chunks().await, 2);
    }

    #[tokio::test]
    async fn test_mismatched_index_triggers_rebuild_attempt() {
        let dir = TempDir::new().unwrap();
        // Persist an index with different dimensions than the configured embedder
        let other = LocalEmbedder::new(32);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![crate::types::DocumentChunk::new("stale entry")],
            &other,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        // Rebuild requires the handbook, which is absent, so init degrades
        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("ok")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));
        assert!(mediator.initialize_resources().await.is_err());
        assert_eq!(mediator.state(), MediatorState::Degraded);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let embedder = LocalEmbedder::new(64);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![crate::types::DocumentChunk::new("policy")],
            &embedder,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("ok")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));
        mediator.initialize_resources().await.unwrap();
        mediator.initialize_resources().await.unwrap();
        assert_eq!(mediator.state(), MediatorState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_build_once() {
        let dir = TempDir::new().unwrap();
        let embedder = LocalEmbedder::new(64);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![crate::types::DocumentChunk::new("policy")],
            &embedder,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("ok")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));

        let a = {
            let m = Arc::clone(&mediator);
            tokio::spawn(async move { m.initialize_resources().await })
        };
        let b = {
            let m = Arc::clone(&mediator);
            tokio::spawn(async move { m.initialize_resources().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(mediator.state(), MediatorState::Ready);
    }

    #[tokio::test]
    async fn test_ready_rag_stream_emits_progress_and_answer() {
        let dir = TempDir::new().unwrap();
        let embedder = LocalEmbedder::new(64);
        let index = VectorIndex::build(
            "handbook_vector_store",
            vec![
                crate::types::DocumentChunk::new("PTO accrues at two days per month"),
                crate::types::DocumentChunk::new("Requests go through the portal"),
            ],
            &embedder,
        )
        .await
        .unwrap();
        let config = rag_config(&dir);
        index.save(&config.index_dir).unwrap();

        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("Two days per month.")),
            Arc::new(LocalEmbedder::new(64)),
            config,
        ));
        mediator.initialize_resources().await.unwrap();

        let rx = mediator.stream(vec![Message::user("What is the PTO policy?")], true);
        let fragments = collect(rx).await;
        assert_eq!(fragments[0], "Retrieving relevant documents...\n");
        assert!(fragments[1].starts_with("Retrieved "));
        assert!(fragments.concat().contains("Two days per month."));
    }
}
