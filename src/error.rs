use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Failure taxonomy for the RAG service. Each variant names the stage the
/// failure occurred in so the API layer can log and map it without
/// inspecting the underlying provider error.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("HuggingFace Hub error: {0}")]
    HfHub(#[from] hf_hub::api::tokio::ApiError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Qdrant error: {0}")]
    Qdrant(Box<qdrant_client::QdrantError>),
}

impl From<qdrant_client::QdrantError> for RagError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        RagError::Qdrant(Box::new(err))
    }
}
