use serde::{Deserialize, Serialize};

use crate::{RagError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub api_key: Option<String>,
    pub api_base: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub qdrant_url: String,
    pub collection_name: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            embedding: EmbeddingConfig {
                model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                cache_size: 1000,
            },
            generation: GenerationConfig {
                model: "llama-3.3-70b-versatile".to_string(),
                temperature: 0.7,
                api_key: None,
                api_base: "https://api.groq.com/openai/v1".to_string(),
                timeout_secs: 60,
            },
            storage: StorageConfig {
                qdrant_url: "http://localhost:6334".to_string(),
                collection_name: "documents".to_string(),
            },
        }
    }
}

impl RagConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset. Values owned by deployment: embedding model,
    /// generation model and temperature, Groq API key, collection name,
    /// Qdrant endpoint, bind address.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("RAG_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("RAG_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| RagError::Config(format!("invalid RAG_PORT: {}", port)))?;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model_id = model;
        }
        if let Ok(model) = std::env::var("GENERATION_MODEL") {
            config.generation.model = model;
        }
        if let Ok(temp) = std::env::var("GENERATION_TEMPERATURE") {
            config.generation.temperature = temp
                .parse()
                .map_err(|_| RagError::Config(format!("invalid GENERATION_TEMPERATURE: {}", temp)))?;
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            config.generation.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("QDRANT_URL") {
            config.storage.qdrant_url = url;
        }
        if let Ok(name) = std::env::var("RAG_COLLECTION") {
            config.storage.collection_name = name;
        }

        Ok(config)
    }
}
