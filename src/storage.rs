use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::{RagError, Result};

/// Open key/value metadata attached to a record. Passed through unmodified;
/// the pipeline never interprets it.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A unit of retrievable knowledge. Immutable once stored; owned by the
/// vector store, never cached by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// A retrieval hit with its similarity score. Scores are cosine similarity,
/// higher = more similar, for every backend in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
}

/// Ingestion input: text plus optional metadata, id assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Vector store contract. Implementations embed query/document text
/// internally through their [`EmbeddingProvider`], persist records, and
/// return nearest neighbors ranked best-first by cosine similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store documents; returns assigned ids in input order.
    async fn add_documents(&self, documents: Vec<DocumentInput>) -> Result<Vec<String>>;

    /// Store raw texts. A metadata list shorter than `texts` is padded with
    /// empty maps. Caller-supplied ids are used verbatim; missing ids are
    /// generated.
    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>>;

    /// Top-k nearest neighbors for `query`, rank order only.
    async fn search(&self, query: &str, k: usize, filter: Option<&Metadata>)
        -> Result<Vec<Record>>;

    /// Top-k nearest neighbors with similarity scores attached.
    async fn search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Remove every record in the collection. Idempotent.
    async fn clear(&self) -> Result<()>;
}

fn resolve_ids_and_metadata(
    count: usize,
    metadatas: Option<Vec<Metadata>>,
    ids: Option<Vec<String>>,
) -> (Vec<String>, Vec<Metadata>) {
    let mut metadatas = metadatas.unwrap_or_default();
    metadatas.resize(count, Metadata::new());

    let mut ids = ids.unwrap_or_default();
    while ids.len() < count {
        ids.push(Uuid::new_v4().to_string());
    }
    ids.truncate(count);

    (ids, metadatas)
}

/// Vector store backed by Qdrant over gRPC. Collections use cosine
/// distance, so scores come back as similarity (higher = more similar).
/// Record text and metadata live in the point payload.
pub struct QdrantStore {
    client: Qdrant,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Connect to Qdrant and create the collection if it does not exist.
    pub async fn connect(
        url: &str,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url).build()?;
        let dimension = embedder.dimension();

        let store = Self {
            client,
            embedder,
            collection: collection.to_string(),
            dimension,
        };
        store.ensure_collection().await?;

        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let collections = self.client.list_collections().await?;
        if collections
            .collections
            .iter()
            .any(|c| c.name == self.collection)
        {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await?;

        info!(collection = %self.collection, dimension = self.dimension, "Created Qdrant collection");
        Ok(())
    }

    async fn upsert(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>> {
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::Ingestion(format!("Failed to embed batch: {}", e)))?;

        let points: Vec<PointStruct> = ids
            .iter()
            .zip(texts)
            .zip(metadatas)
            .zip(embeddings)
            .map(|(((id, text), metadata), embedding)| {
                let mut payload_map = serde_json::Map::new();
                payload_map.insert("id".to_string(), serde_json::Value::String(id.clone()));
                payload_map.insert("text".to_string(), serde_json::Value::String(text));
                payload_map.insert(
                    "metadata".to_string(),
                    serde_json::Value::Object(metadata),
                );
                let payload = Payload::try_from(serde_json::Value::Object(payload_map))
                    .unwrap_or_default();

                PointStruct::new(qdrant_point_id(id), embedding, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| RagError::Ingestion(format!("Qdrant upsert failed: {}", e)))?;

        debug!(collection = %self.collection, count = ids.len(), "Upserted records");
        Ok(ids)
    }

    fn build_filter(filter: Option<&Metadata>) -> Option<Filter> {
        let filter = filter?;
        if filter.is_empty() {
            return None;
        }

        let conditions: Vec<Condition> = filter
            .iter()
            .filter_map(|(key, value)| {
                let field = format!("metadata.{}", key);
                match value {
                    serde_json::Value::String(s) => Some(Condition::matches(field, s.clone())),
                    serde_json::Value::Bool(b) => Some(Condition::matches(field, *b)),
                    serde_json::Value::Number(n) => {
                        n.as_i64().map(|i| Condition::matches(field, i))
                    }
                    _ => None,
                }
            })
            .collect();

        Some(Filter::must(conditions))
    }

    fn record_from_payload(
        id: Option<&qdrant_client::qdrant::PointId>,
        payload: &HashMap<String, QdrantValue>,
    ) -> Record {
        // The external id lives in the payload; the point id is only a
        // fallback for points written without one.
        let id = payload
            .get("id")
            .and_then(|v| match &v.kind {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            })
            .or_else(|| {
                id.and_then(|pid| match &pid.point_id_options {
                    Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
                    Some(PointIdOptions::Num(n)) => Some(n.to_string()),
                    None => None,
                })
            })
            .unwrap_or_default();

        let text = payload
            .get("text")
            .and_then(|v| match &v.kind {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let metadata = payload
            .get("metadata")
            .map(qdrant_value_to_json)
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

        Record { id, text, metadata }
    }

    async fn scored_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredRecord>> {
        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RagError::Retrieval(format!("Failed to embed query: {}", e)))?;

        let mut builder =
            SearchPointsBuilder::new(&self.collection, embedding, k as u64).with_payload(true);
        if let Some(filter) = Self::build_filter(filter) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RagError::Retrieval(format!("Qdrant search failed: {}", e)))?;

        let results = response
            .result
            .into_iter()
            .map(|scored| ScoredRecord {
                record: Self::record_from_payload(scored.id.as_ref(), &scored.payload),
                score: scored.score,
            })
            .collect();

        Ok(results)
    }
}

/// Map an external record id onto a Qdrant point id. Qdrant only accepts
/// UUID strings or unsigned integers as point ids, so UUID ids pass through
/// and anything else becomes a hash-derived UUID. The mapping is
/// deterministic: re-ingesting under the same caller id hits the same point.
pub(crate) fn qdrant_point_id(external_id: &str) -> String {
    if Uuid::parse_str(external_id).is_ok() {
        return external_id.to_string();
    }

    let mut hasher = DefaultHasher::new();
    external_id.hash(&mut hasher);
    let high = hasher.finish();
    high.hash(&mut hasher);
    let low = hasher.finish();

    Uuid::from_u64_pair(high, low).to_string()
}

/// Convert a Qdrant payload value into its JSON equivalent.
fn qdrant_value_to_json(value: &QdrantValue) -> serde_json::Value {
    match &value.kind {
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn add_documents(&self, documents: Vec<DocumentInput>) -> Result<Vec<String>> {
        let (texts, metadatas): (Vec<String>, Vec<Metadata>) = documents
            .into_iter()
            .map(|doc| (doc.text, doc.metadata))
            .unzip();
        let ids: Vec<String> = texts.iter().map(|_| Uuid::new_v4().to_string()).collect();

        self.upsert(ids, texts, metadatas).await
    }

    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let (ids, metadatas) = resolve_ids_and_metadata(texts.len(), metadatas, ids);
        self.upsert(ids, texts, metadatas).await
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Record>> {
        let scored = self.scored_search(query, k, filter).await?;
        Ok(scored.into_iter().map(|s| s.record).collect())
    }

    async fn search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredRecord>> {
        self.scored_search(query, k, filter).await
    }

    async fn clear(&self) -> Result<()> {
        // Native truncate: drop and recreate the collection. Safe to call
        // when the collection is already gone. Failures here are write
        // failures, so they carry the ingestion stage.
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| RagError::Ingestion(format!("Qdrant clear failed: {}", e)))?;
        if collections
            .collections
            .iter()
            .any(|c| c.name == self.collection)
        {
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| RagError::Ingestion(format!("Qdrant clear failed: {}", e)))?;
        }
        self.ensure_collection()
            .await
            .map_err(|e| RagError::Ingestion(format!("Qdrant clear failed: {}", e)))?;

        info!(collection = %self.collection, "Cleared collection");
        Ok(())
    }
}

struct StoredRecord {
    record: Record,
    embedding: Vec<f32>,
}

/// In-memory vector store using cosine similarity. Suitable for development
/// and tests; same scoring convention as [`QdrantStore`].
pub struct InMemoryStore {
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn matches_filter(record: &Record, filter: Option<&Metadata>) -> bool {
        match filter {
            None => true,
            Some(filter) => filter
                .iter()
                .all(|(key, value)| record.metadata.get(key) == Some(value)),
        }
    }

    async fn scored_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredRecord>> {
        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RagError::Retrieval(format!("Failed to embed query: {}", e)))?;

        let records = self.records.read().await;
        let mut scored: Vec<ScoredRecord> = records
            .values()
            .filter(|stored| Self::matches_filter(&stored.record, filter))
            .map(|stored| ScoredRecord {
                record: stored.record.clone(),
                score: cosine_similarity(&stored.embedding, &embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn upsert(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<Vec<String>> {
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::Ingestion(format!("Failed to embed batch: {}", e)))?;

        let mut records = self.records.write().await;
        for (((id, text), metadata), embedding) in
            ids.iter().zip(texts).zip(metadatas).zip(embeddings)
        {
            records.insert(
                id.clone(),
                StoredRecord {
                    record: Record {
                        id: id.clone(),
                        text,
                        metadata,
                    },
                    embedding,
                },
            );
        }

        Ok(ids)
    }
}

/// Cosine similarity; returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add_documents(&self, documents: Vec<DocumentInput>) -> Result<Vec<String>> {
        let (texts, metadatas): (Vec<String>, Vec<Metadata>) = documents
            .into_iter()
            .map(|doc| (doc.text, doc.metadata))
            .unzip();
        let ids: Vec<String> = texts.iter().map(|_| Uuid::new_v4().to_string()).collect();

        self.upsert(ids, texts, metadatas).await
    }

    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let (ids, metadatas) = resolve_ids_and_metadata(texts.len(), metadatas, ids);
        self.upsert(ids, texts, metadatas).await
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Record>> {
        let scored = self.scored_search(query, k, filter).await?;
        Ok(scored.into_iter().map(|s| s.record).collect())
    }

    async fn search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredRecord>> {
        self.scored_search(query, k, filter).await
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}
