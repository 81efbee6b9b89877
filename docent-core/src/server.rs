//! HTTP service layer built on axum.
//!
//! Exposes the chat endpoint as a streaming `text/plain` response plus
//! health and document-management routes. The router owns no logic of its
//! own; everything is delegated to the injected state.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::documents::DocumentStore;
use crate::error::DocentError;
use crate::mediator::Mediator;
use crate::session::ChatSession;

/// Shared state injected into every handler.
pub struct AppState {
    pub mediator: Arc<Mediator>,
    pub session: Arc<ChatSession>,
    pub documents: Arc<DocumentStore>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
    #[serde(default)]
    use_rag: bool,
}

/// Build the API router over the shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/prompt", post(prompt_handler))
        .route("/api/health", get(health_handler))
        .route("/api/documents", get(list_documents_handler))
        .route(
            "/api/documents/{filename}",
            put(upload_document_handler).delete(delete_document_handler),
        )
        .with_state(state)
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn prompt_handler(
    State(state): State<SharedState>,
    Json(request): Json<PromptRequest>,
) -> Response {
    info!(use_rag = request.use_rag, "Received prompt");

    match state.session.submit(&request.prompt, request.use_rag).await {
        Ok(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| {
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to build response".into(),
                    )
                })
        }
        Err(DocentError::Validation { message }) => {
            json_error(StatusCode::BAD_REQUEST, message)
        }
        Err(e) => {
            error!(error = %e, "Prompt handling failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
        }
    }
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": state.mediator.state().as_str(),
        "indexed_chunks": state.mediator.indexed_chunks().await,
        "retriever_fallbacks": state.mediator.retriever_fallbacks().await,
    });
    Json(body)
}

async fn list_documents_handler(State(state): State<SharedState>) -> Response {
    match state.documents.list() {
        Ok(names) => Json(serde_json::json!({ "documents": names })).into_response(),
        Err(e) => {
            error!(error = %e, "Listing documents failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
        }
    }
}

async fn upload_document_handler(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    match state.documents.save(&filename, &body) {
        Ok(path) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "stored": path.file_name().and_then(|n| n.to_str()),
            })),
        )
            .into_response(),
        Err(DocentError::Validation { message }) => json_error(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            error!(error = %e, "Document upload failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
        }
    }
}

async fn delete_document_handler(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Response {
    match state.documents.delete(&filename) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(DocentError::NotFound { .. }) => {
            json_error(StatusCode::NOT_FOUND, format!("No such document: {}", filename))
        }
        Err(e) => {
            error!(error = %e, "Document delete failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
        }
    }
}

/// Start the HTTP server on the configured address.
///
/// Runs until cancelled.
pub async fn run(state: SharedState, config: &ServerConfig) -> Result<(), std::io::Error> {
    let app = router(state).layer(tower_http::trace::TraceLayer::new_for_http());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RagConfig, UploadsConfig};
    use crate::embeddings::LocalEmbedder;
    use crate::llm::MockLlmProvider;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn make_state(dir: &TempDir) -> SharedState {
        let mediator = Arc::new(Mediator::new(
            Arc::new(MockLlmProvider::with_response("hello from the model")),
            Arc::new(LocalEmbedder::new(64)),
            RagConfig {
                knowledge_dir: dir.path().join("knowledge"),
                index_dir: dir.path().join("vector_store"),
                ..RagConfig::default()
            },
        ));
        Arc::new(AppState {
            session: Arc::new(ChatSession::new(Arc::clone(&mediator))),
            mediator,
            documents: Arc::new(DocumentStore::new(&UploadsConfig {
                dir: dir.path().join("uploads"),
                ..UploadsConfig::default()
            })),
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        let req = axum::http::Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "uninitialized");
        assert_eq!(json["indexed_chunks"], 0);
        assert_eq!(json["retriever_fallbacks"], 0);
    }

    #[tokio::test]
    async fn test_prompt_streams_plain_text() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        let req = post_json(
            "/api/prompt",
            serde_json::json!({ "prompt": "say hello", "use_rag": false }),
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "hello from the model "
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_is_400() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        let req = post_json("/api/prompt", serde_json::json!({ "prompt": "   " }));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Prompt cannot be empty.");
    }

    #[tokio::test]
    async fn test_use_rag_defaults_to_false() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        // No use_rag key at all; must stream directly, not fail over RAG
        let req = post_json("/api/prompt", serde_json::json!({ "prompt": "hello" }));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        assert!(!String::from_utf8(body.to_vec()).unwrap().contains("Error"));
    }

    #[tokio::test]
    async fn test_document_upload_list_delete_cycle() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);

        let req = axum::http::Request::builder()
            .method("PUT")
            .uri("/api/documents/policy.pdf")
            .body(Body::from("%PDF-1.5 fake"))
            .unwrap();
        let resp = router(Arc::clone(&state)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 201);

        let req = axum::http::Request::builder()
            .uri("/api/documents")
            .body(Body::empty())
            .unwrap();
        let resp = router(Arc::clone(&state)).oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["documents"], serde_json::json!(["policy.pdf"]));

        let req = axum::http::Request::builder()
            .method("DELETE")
            .uri("/api/documents/policy.pdf")
            .body(Body::empty())
            .unwrap();
        let resp = router(Arc::clone(&state)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn test_document_upload_bad_extension_is_400() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        let req = axum::http::Request::builder()
            .method("PUT")
            .uri("/api/documents/script.sh")
            .body(Body::from("#!/bin/sh"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_document_delete_missing_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(make_state(&dir));

        let req = axum::http::Request::builder()
            .method("DELETE")
            .uri("/api/documents/ghost.pdf")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }
}
