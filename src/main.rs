use rag_chat::{
    api::{create_router, AppState},
    config::RagConfig,
    embedding::CandleEmbedding,
    generation::GroqGeneration,
    pipeline::RagPipeline,
    storage::QdrantStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting RAG chat service...");

    let config = RagConfig::from_env()?;

    // Providers are constructed once here and injected ready-to-use; no
    // lazy initialization anywhere downstream.
    let embedder = Arc::new(
        CandleEmbedding::new(&config.embedding.model_id, config.embedding.cache_size).await?,
    );
    let store = Arc::new(
        QdrantStore::connect(
            &config.storage.qdrant_url,
            &config.storage.collection_name,
            embedder,
        )
        .await?,
    );
    let generator = Arc::new(GroqGeneration::new(&config.generation)?);

    let pipeline = Arc::new(RagPipeline::new(store, generator));

    let app = create_router(AppState { pipeline });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("RAG chat service listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Chat endpoint: http://{}/rag/chat", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
