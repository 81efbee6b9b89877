//! Ollama LLM provider.
//!
//! Speaks the Ollama `/api/chat` endpoint in both non-streaming and
//! streaming forms. Streaming responses arrive as newline-delimited JSON;
//! the body is parsed incrementally so tokens reach the consumer as they
//! are produced, not after the full answer is buffered.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, Role, StreamEvent, TokenUsage,
};

/// LLM provider backed by a local or remote Ollama server.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".into()),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    /// Convert internal messages to Ollama chat JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            })
            .collect()
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "stream": stream,
            "options": { "temperature": self.temperature.clamp(0.0, 2.0) },
        });
        if let Some(max_tokens) = request.max_tokens {
            body["options"]["num_predict"] = json!(max_tokens);
        }
        body
    }

    fn usage_from_json(json: &Value) -> TokenUsage {
        TokenUsage {
            input_tokens: json
                .get("prompt_eval_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
            output_tokens: json.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0)
                as usize,
        }
    }

    /// Handle one NDJSON line from the streaming body.
    ///
    /// Returns `true` when the line carried the final `done` marker.
    async fn handle_stream_line(
        line: &str,
        tx: &mpsc::Sender<StreamEvent>,
        usage: &mut TokenUsage,
    ) -> Result<bool, LlmError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }

        let data: Value = serde_json::from_str(line).map_err(|e| LlmError::ResponseParse {
            message: format!("invalid NDJSON line from Ollama: {}", e),
        })?;

        if let Some(err) = data.get("error").and_then(|e| e.as_str()) {
            return Err(LlmError::Streaming {
                message: format!("Ollama reported: {}", err),
            });
        }

        match data["message"]["content"].as_str() {
            Some(content) if !content.is_empty() => {
                // A closed channel means the consumer went away; stop by
                // signalling done to the caller.
                if tx.send(StreamEvent::Token(content.to_string())).await.is_err() {
                    return Ok(true);
                }
            }
            Some(_) => {}
            None => {
                debug!("Skipping stream chunk without textual content");
            }
        }

        if data.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
            *usage = Self::usage_from_json(&data);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl crate::llm::LlmProvider for OllamaProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.request_body(&request, false);

        debug!(url = %url, model = %self.model, "Sending Ollama completion request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                message: format!("POST {} failed: {}", url, e),
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(LlmError::ApiRequest {
                message: format!("Ollama returned status {}: {}", status, response_body),
            });
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("invalid JSON from Ollama: {}", e),
            })?;

        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "response missing message.content".into(),
            })?;

        Ok(CompletionResponse {
            message: Message::assistant(content),
            usage: Self::usage_from_json(&json),
            model: json["model"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
        })
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.request_body(&request, true);

        debug!(url = %url, model = %self.model, "Starting Ollama streaming request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                message: format!("POST {} failed: {}", url, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiRequest {
                message: format!("Ollama returned status {}: {}", status, body_text),
            });
        }

        let mut usage = TokenUsage::default();
        let mut buffer = String::new();
        let mut byte_stream = response.bytes_stream();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Streaming {
                message: format!("failed to read stream: {}", e),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Complete lines only; a partial line stays buffered for the
            // next network chunk.
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                if Self::handle_stream_line(&line, &tx, &mut usage).await? {
                    break 'outer;
                }
            }
        }

        if !buffer.trim().is_empty() {
            Self::handle_stream_line(&buffer, &tx, &mut usage).await?;
        }

        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
