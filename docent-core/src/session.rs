//! Per-conversation chat state.
//!
//! Holds the ordered message history and drives the mediator. The
//! assistant's turn is only appended to history after the stream has been
//! fully delivered to the consumer; a stream abandoned mid-way leaves the
//! history with the user turn alone.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::{DocentError, Result};
use crate::mediator::Mediator;
use crate::types::Message;

/// A chat session bound to one conversation history.
pub struct ChatSession {
    mediator: Arc<Mediator>,
    history: Arc<Mutex<Vec<Message>>>,
}

impl ChatSession {
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            mediator,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of the conversation so far.
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    /// Submit a prompt and stream back the response.
    ///
    /// Fails with `Validation` on an empty or whitespace-only prompt,
    /// before the history is touched. The user turn is appended up front;
    /// the assistant turn (all fragments concatenated verbatim) only after
    /// the final fragment has been delivered.
    pub async fn submit(&self, prompt: &str, use_rag: bool) -> Result<mpsc::Receiver<Bytes>> {
        if prompt.trim().is_empty() {
            return Err(DocentError::Validation {
                message: "Prompt cannot be empty.".into(),
            });
        }

        let full_history = {
            let mut history = self.history.lock().await;
            history.push(Message::user(prompt));
            history.clone()
        };
        debug!(turns = full_history.len(), "Submitting conversation to mediator");

        let mut inner = self.mediator.stream(full_history, use_rag);
        let (tx, rx) = mpsc::channel::<Bytes>(8);
        let history = Arc::clone(&self.history);

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(fragment) = inner.recv().await {
                buffer.push_str(&String::from_utf8_lossy(&fragment));
                if tx.send(fragment).await.is_err() {
                    // Consumer abandoned the stream: at-most-once append
                    // means the assistant turn is simply never recorded.
                    debug!("Stream abandoned; discarding partial assistant turn");
                    return;
                }
            }
            info!(chars = buffer.len(), "Response fully streamed; recording assistant turn");
            history.lock().await.push(Message::assistant(buffer));
        });

        Ok(rx)
    }
}
