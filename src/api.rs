use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::pipeline::{RagPipeline, DEFAULT_MAX_RESULTS};
use crate::storage::{DocumentInput, Metadata, Record, ScoredRecord};
use crate::RagError;

pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub max_results: Option<usize>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceResponse {
    pub content: String,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceResponse>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoredSourceResponse {
    pub document: SourceResponse,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatWithScoresResponse {
    pub answer: String,
    pub sources: Vec<ScoredSourceResponse>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub content: String,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddDocumentsRequest {
    pub documents: Vec<DocumentRequest>,
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentsResponse {
    pub document_ids: Vec<String>,
    pub count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddTextsRequest {
    pub texts: Vec<String>,
    pub metadata: Option<Vec<Metadata>>,
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTextsResponse {
    pub text_ids: Vec<String>,
    pub count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearDocumentsResponse {
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/rag/chat", post(chat))
        .route("/rag/chat-with-scores", post(chat_with_scores))
        .route("/rag/documents", post(add_documents))
        .route("/rag/documents", delete(clear_documents))
        .route("/rag/texts", post(add_texts))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(Arc::new(state))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn source_response(record: Record) -> SourceResponse {
    SourceResponse {
        content: record.text,
        metadata: record.metadata,
    }
}

fn scored_source_response(scored: ScoredRecord) -> ScoredSourceResponse {
    ScoredSourceResponse {
        document: source_response(scored.record),
        score: scored.score,
    }
}

/// Map a pipeline failure to a transport-level failure. Collaborator errors
/// are never wrapped into a 2xx body.
pub(crate) fn map_error(err: RagError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        RagError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        RagError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "EMBEDDING_ERROR"),
        RagError::Retrieval(_) | RagError::Qdrant(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "RETRIEVAL_ERROR")
        }
        RagError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_ERROR"),
        RagError::Ingestion(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INGESTION_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Chat request: {}", truncate(&request.message, 100));

    let result = state
        .pipeline
        .answer(
            &request.message,
            request.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            request.system_prompt.as_deref(),
        )
        .await
        .map_err(|e| {
            error!("Chat error: {}", e);
            map_error(e)
        })?;

    Ok(Json(ChatResponse {
        answer: result.answer,
        sources: result.sources.into_iter().map(source_response).collect(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn chat_with_scores(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatWithScoresResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Chat with scores request: {}", truncate(&request.message, 100));

    let result = state
        .pipeline
        .answer_with_scores(
            &request.message,
            request.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            request.system_prompt.as_deref(),
        )
        .await
        .map_err(|e| {
            error!("Chat with scores error: {}", e);
            map_error(e)
        })?;

    Ok(Json(ChatWithScoresResponse {
        answer: result.answer,
        sources: result
            .sources
            .into_iter()
            .map(scored_source_response)
            .collect(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn add_documents(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddDocumentsRequest>,
) -> std::result::Result<(StatusCode, Json<AddDocumentsResponse>), (StatusCode, Json<ErrorResponse>)>
{
    info!("Adding {} documents", request.documents.len());

    let source = request.source.unwrap_or_else(|| "api".to_string());
    let ingested_at = chrono::Utc::now().to_rfc3339();

    // Boundary-layer metadata augmentation; the pipeline itself never
    // touches metadata.
    let documents: Vec<DocumentInput> = request
        .documents
        .into_iter()
        .map(|doc| {
            let mut metadata = doc.metadata.unwrap_or_default();
            metadata.insert(
                "source".to_string(),
                serde_json::Value::String(source.clone()),
            );
            metadata.insert(
                "timestamp".to_string(),
                serde_json::Value::String(ingested_at.clone()),
            );
            DocumentInput {
                text: doc.content,
                metadata,
            }
        })
        .collect();

    let document_ids = state
        .pipeline
        .ingest_documents(documents)
        .await
        .map_err(|e| {
            error!("Add documents error: {}", e);
            map_error(e)
        })?;

    let count = document_ids.len();
    Ok((
        StatusCode::CREATED,
        Json(AddDocumentsResponse {
            document_ids,
            count,
            timestamp: chrono::Utc::now(),
        }),
    ))
}

async fn add_texts(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddTextsRequest>,
) -> std::result::Result<(StatusCode, Json<AddTextsResponse>), (StatusCode, Json<ErrorResponse>)> {
    info!("Adding {} texts", request.texts.len());

    let text_ids = state
        .pipeline
        .ingest_texts(request.texts, request.metadata, request.ids)
        .await
        .map_err(|e| {
            error!("Add texts error: {}", e);
            map_error(e)
        })?;

    let count = text_ids.len();
    Ok((
        StatusCode::CREATED,
        Json(AddTextsResponse {
            text_ids,
            count,
            timestamp: chrono::Utc::now(),
        }),
    ))
}

async fn clear_documents(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<ClearDocumentsResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Clearing all documents from RAG system");

    state.pipeline.clear().await.map_err(|e| {
        error!("Clear documents error: {}", e);
        map_error(e)
    })?;

    Ok(Json(ClearDocumentsResponse {
        message: "All documents cleared successfully".to_string(),
        timestamp: chrono::Utc::now(),
    }))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub async fn logging_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        uri = %uri,
        status = %status,
        latency_ms = %latency.as_millis(),
        "Request processed"
    );

    response
}
