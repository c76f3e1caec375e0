use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use dashmap::DashMap;
use hf_hub::api::tokio::Api;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokenizers::Tokenizer;

use crate::{RagError, Result};

/// Converts text into fixed-length vectors for similarity search.
///
/// Batch embedding is all-or-nothing: a failure on any input aborts the
/// whole batch so ingestion never partially embeds.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Bounded embedding cache keyed by text hash. DashMap has no eviction
/// order, so hitting capacity flushes the whole map before the next insert.
pub(crate) struct EmbeddingCache {
    entries: DashMap<u64, Vec<f32>>,
    capacity: usize,
}

impl EmbeddingCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub(crate) fn get(&self, key: u64) -> Option<Vec<f32>> {
        self.entries.get(&key).map(|e| e.clone())
    }

    pub(crate) fn insert(&self, key: u64, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        self.entries.insert(key, embedding);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Local sentence-embedding provider running a BERT encoder on CPU via
/// candle. Defaults to `sentence-transformers/all-MiniLM-L6-v2` (384-dim,
/// mean pooling, L2 normalized). Embeddings are cached by text hash up to
/// the configured cache size.
pub struct CandleEmbedding {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    cache: EmbeddingCache,
}

impl CandleEmbedding {
    pub async fn new(model_id: &str, cache_size: usize) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new()?;
        let repo = api.model(model_id.to_string());

        let tokenizer_path = repo.get("tokenizer.json").await?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RagError::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;

        let config_path = repo.get("config.json").await?;
        let config_content = std::fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;

        let weights_path = match repo.get("model.safetensors").await {
            Ok(path) => path,
            Err(_) => repo.get("pytorch_model.bin").await?,
        };
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], candle_core::DType::F32, &device)?
        };

        let dimension = config.hidden_size;
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
            cache: EmbeddingCache::new(cache_size),
        })
    }

    fn cache_key(&self, text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    async fn compute_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Embedding(format!("Tokenization failed: {}", e)))?;

        let tokens = encoding.get_ids();
        let token_ids = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let attention_mask =
            Tensor::ones((1, tokens.len()), candle_core::DType::U32, &self.device)?;

        let embeddings = self.model.forward(&token_ids, &attention_mask, None)?;

        // Mean pooling over the token axis, then L2 normalize.
        let pooled = embeddings.mean(1)?;
        let embedding_vec = pooled.to_vec2::<f32>()?[0].clone();

        let norm = embedding_vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized: Vec<f32> = embedding_vec.iter().map(|x| x / norm).collect();

        Ok(normalized)
    }
}

#[async_trait]
impl EmbeddingProvider for CandleEmbedding {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.cache_key(text);
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }

        let embedding = self.compute_embedding(text).await?;
        self.cache.insert(key, embedding.clone());

        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let mut uncached = Vec::new();
        let mut keys = Vec::with_capacity(texts.len());

        for text in texts {
            let key = self.cache_key(text);
            keys.push(key);

            if let Some(cached) = self.cache.get(key) {
                embeddings.push(Some(cached));
            } else {
                embeddings.push(None);
                uncached.push(text.as_str());
            }
        }

        // try_join_all aborts the batch on the first failure.
        let computed = futures::future::try_join_all(
            uncached.into_iter().map(|text| self.compute_embedding(text)),
        )
        .await?;

        let mut computed_idx = 0;
        let mut result = Vec::with_capacity(texts.len());

        for (i, cached) in embeddings.into_iter().enumerate() {
            match cached {
                Some(embedding) => result.push(embedding),
                None => {
                    let embedding = computed[computed_idx].clone();
                    self.cache.insert(keys[i], embedding.clone());
                    result.push(embedding);
                    computed_idx += 1;
                }
            }
        }

        Ok(result)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
