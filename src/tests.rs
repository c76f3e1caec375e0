mod mocks {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::embedding::EmbeddingProvider;
    use crate::generation::{ChatMessage, GenerationProvider};
    use crate::storage::{DocumentInput, Metadata, Record, ScoredRecord, VectorStore};
    use crate::Result;

    /// Deterministic embedder: a letter-frequency histogram, L2-normalized
    /// by the cosine computation downstream. Identical texts embed
    /// identically, overlapping texts score higher than disjoint ones.
    pub struct HistogramEmbedding;

    fn histogram(text: &str) -> Vec<f32> {
        let mut counts = vec![0.0f32; 26];
        for c in text.chars().flat_map(|c| c.to_lowercase()) {
            if c.is_ascii_lowercase() {
                counts[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        counts
    }

    #[async_trait]
    impl EmbeddingProvider for HistogramEmbedding {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(histogram(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| histogram(t)).collect())
        }

        fn dimension(&self) -> usize {
            26
        }
    }

    /// Canned generator that records every message list it is invoked with.
    pub struct RecordingGeneration {
        pub answer: String,
        pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl RecordingGeneration {
        pub fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn last_prompt(&self) -> String {
            let calls = self.calls.lock().unwrap();
            calls
                .last()
                .and_then(|messages| messages.last())
                .map(|m| m.content.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerationProvider for RecordingGeneration {
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(self.answer.clone())
        }
    }

    /// Store decorator that records the `k` of the most recent search.
    pub struct RecordingStore<S> {
        pub inner: S,
        pub last_k: AtomicUsize,
    }

    impl<S> RecordingStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                last_k: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl<S: VectorStore> VectorStore for RecordingStore<S> {
        async fn add_documents(&self, documents: Vec<DocumentInput>) -> Result<Vec<String>> {
            self.inner.add_documents(documents).await
        }

        async fn add_texts(
            &self,
            texts: Vec<String>,
            metadatas: Option<Vec<Metadata>>,
            ids: Option<Vec<String>>,
        ) -> Result<Vec<String>> {
            self.inner.add_texts(texts, metadatas, ids).await
        }

        async fn search(
            &self,
            query: &str,
            k: usize,
            filter: Option<&Metadata>,
        ) -> Result<Vec<Record>> {
            self.last_k.store(k, Ordering::SeqCst);
            self.inner.search(query, k, filter).await
        }

        async fn search_with_score(
            &self,
            query: &str,
            k: usize,
            filter: Option<&Metadata>,
        ) -> Result<Vec<ScoredRecord>> {
            self.last_k.store(k, Ordering::SeqCst);
            self.inner.search_with_score(query, k, filter).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }
}

mod prompt_tests {
    use crate::prompt::{build_prompt, format_context};
    use crate::storage::{Metadata, Record};

    fn record(id: &str, text: &str) -> Record {
        Record {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_context_numbering_starts_at_one() {
        let records = vec![record("1", "first passage"), record("2", "second passage")];
        let context = format_context(&records);

        assert_eq!(context, "[1] first passage\n\n[2] second passage");
    }

    #[test]
    fn test_default_template_structure() {
        let records = vec![record("1", "Paris is the capital of France.")];
        let prompt = build_prompt("What is the capital of France?", &records, None);

        assert!(prompt.starts_with("You are a helpful assistant"));
        assert!(prompt.contains("Context:\n[1] Paris is the capital of France."));
        assert!(prompt.contains("Question: What is the capital of France?"));
        assert!(prompt.contains("I don't have enough information"));
    }

    #[test]
    fn test_empty_context_is_not_short_circuited() {
        let prompt = build_prompt("anything", &[], None);

        // The context section stays empty; the fallback phrasing is an
        // instruction to the model, not a pipeline-injected answer.
        assert!(prompt.contains("Context:\n\n"));
        assert!(prompt.contains("Question: anything"));
    }

    #[test]
    fn test_caller_prompt_replaces_template() {
        let records = vec![record("1", "some context")];
        let prompt = build_prompt("query", &records, Some("Answer in pirate speak."));

        assert_eq!(prompt, "Answer in pirate speak.");
        assert!(!prompt.contains("You are a helpful assistant"));
    }
}

mod pipeline_tests {
    use std::sync::Arc;

    use super::mocks::{HistogramEmbedding, RecordingGeneration, RecordingStore};
    use crate::pipeline::{RagPipeline, DEFAULT_MAX_RESULTS};
    use crate::storage::{DocumentInput, InMemoryStore, Metadata, VectorStore};

    fn meta(key: &str, value: serde_json::Value) -> Metadata {
        let mut map = Metadata::new();
        map.insert(key.to_string(), value);
        map
    }

    fn pipeline_with(
        answer: &str,
    ) -> (RagPipeline, Arc<InMemoryStore>, Arc<RecordingGeneration>) {
        let store = Arc::new(InMemoryStore::new(Arc::new(HistogramEmbedding)));
        let generator = Arc::new(RecordingGeneration::new(answer));
        let pipeline = RagPipeline::new(store.clone(), generator.clone());
        (pipeline, store, generator)
    }

    #[tokio::test]
    async fn test_ingest_texts_returns_ids_in_order() {
        let (pipeline, _, _) = pipeline_with("ok");

        let ids = pipeline
            .ingest_texts(
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                None,
                Some(vec!["id-a".to_string(), "id-b".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "id-a");
        assert_eq!(ids[1], "id-b");
        // Missing third id is store-generated.
        assert!(!ids[2].is_empty());
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let (pipeline, _, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(
                vec!["a".to_string(), "b".to_string()],
                Some(vec![
                    meta("x", serde_json::json!(1)),
                    meta("x", serde_json::json!(2)),
                ]),
                None,
            )
            .await
            .unwrap();

        let result = pipeline.answer("a", 1, None).await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].text, "a");
        assert_eq!(
            result.sources[0].metadata.get("x"),
            Some(&serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn test_short_metadata_is_padded_not_rejected() {
        let (pipeline, _, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(
                vec!["alpha".to_string(), "beta".to_string()],
                Some(vec![meta("x", serde_json::json!(1))]),
                None,
            )
            .await
            .unwrap();

        let result = pipeline.answer("beta", 1, None).await.unwrap();
        assert_eq!(result.sources[0].text, "beta");
        assert!(result.sources[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_sources_never_exceed_corpus_size() {
        let (pipeline, _, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(vec!["one".to_string(), "two".to_string()], None, None)
            .await
            .unwrap();

        let result = pipeline.answer("one", 10, None).await.unwrap();
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_model_answer_with_no_sources() {
        let (pipeline, _, _) = pipeline_with("I don't have enough information.");

        let result = pipeline.answer("anything", 5, None).await.unwrap();
        assert!(result.sources.is_empty());
        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn test_answer_with_scores_preserves_rank_order() {
        let (pipeline, store, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(
                vec![
                    "aaaa".to_string(),
                    "bbbb".to_string(),
                    "aabb".to_string(),
                ],
                None,
                None,
            )
            .await
            .unwrap();

        let result = pipeline.answer_with_scores("aaaa", 3, None).await.unwrap();
        let direct = store.search_with_score("aaaa", 3, None).await.unwrap();

        assert_eq!(result.sources.len(), direct.len());
        for (got, expected) in result.sources.iter().zip(&direct) {
            assert_eq!(got.record.text, expected.record.text);
            assert!(got.score.is_finite());
        }

        // Cosine similarity: higher = more similar, so the exact match
        // ranks first.
        assert_eq!(result.sources[0].record.text, "aaaa");
        assert!(result.sources[0].score >= result.sources[1].score);
    }

    #[tokio::test]
    async fn test_scores_do_not_enter_the_prompt() {
        let (pipeline, _, generator) = pipeline_with("ok");

        pipeline
            .ingest_texts(vec!["grounding passage".to_string()], None, None)
            .await
            .unwrap();

        pipeline
            .answer_with_scores("grounding", 1, None)
            .await
            .unwrap();

        let prompt = generator.last_prompt();
        assert!(prompt.contains("[1] grounding passage"));
        assert!(!prompt.contains("score"));
    }

    #[tokio::test]
    async fn test_caller_system_prompt_is_sent_verbatim() {
        let (pipeline, _, generator) = pipeline_with("ok");

        pipeline
            .ingest_texts(vec!["context".to_string()], None, None)
            .await
            .unwrap();

        pipeline
            .answer("query", 5, Some("Custom instructions only."))
            .await
            .unwrap();

        assert_eq!(generator.last_prompt(), "Custom instructions only.");
    }

    #[tokio::test]
    async fn test_clear_empties_store_and_is_idempotent() {
        let (pipeline, store, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(vec!["doc".to_string()], None, None)
            .await
            .unwrap();

        pipeline.clear().await.unwrap();
        pipeline.clear().await.unwrap();

        let results = store.search("doc", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_answer_is_deterministic_for_unchanged_collection() {
        let (pipeline, _, _) = pipeline_with("ok");

        pipeline
            .ingest_texts(
                vec!["first text".to_string(), "second text".to_string()],
                None,
                None,
            )
            .await
            .unwrap();

        let first = pipeline.answer("first", 2, None).await.unwrap();
        let second = pipeline.answer("first", 2, None).await.unwrap();

        assert_eq!(first.sources.len(), second.sources.len());
        let first_order: Vec<_> = first.sources.iter().map(|s| &s.id).collect();
        let second_order: Vec<_> = second.sources.iter().map(|s| &s.id).collect();
        assert_eq!(first_order, second_order);
    }

    #[tokio::test]
    async fn test_default_max_results_is_five() {
        assert_eq!(DEFAULT_MAX_RESULTS, 5);

        let store = Arc::new(RecordingStore::new(InMemoryStore::new(Arc::new(
            HistogramEmbedding,
        ))));
        let generator = Arc::new(RecordingGeneration::new("ok"));
        let pipeline = RagPipeline::new(store.clone(), generator);

        pipeline
            .answer("query", DEFAULT_MAX_RESULTS, None)
            .await
            .unwrap();

        assert_eq!(store.last_k.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_chromadb_scenario() {
        let (pipeline, _, _) = pipeline_with("ChromaDB is a vector database.");

        pipeline
            .ingest_texts(
                vec!["ChromaDB is a vector database.".to_string()],
                None,
                None,
            )
            .await
            .unwrap();

        let result = pipeline.answer("What is ChromaDB?", 1, None).await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].text, "ChromaDB is a vector database.");
    }

    #[tokio::test]
    async fn test_ingest_documents_returns_one_id_per_document() {
        let (pipeline, _, _) = pipeline_with("ok");

        let ids = pipeline
            .ingest_documents(vec![
                DocumentInput {
                    text: "doc one".to_string(),
                    metadata: meta("source", serde_json::json!("api")),
                },
                DocumentInput {
                    text: "doc two".to_string(),
                    metadata: Metadata::new(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}

mod storage_tests {
    use std::sync::Arc;

    use super::mocks::HistogramEmbedding;
    use crate::storage::{cosine_similarity, InMemoryStore, Metadata, VectorStore};

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let zero = vec![0.0, 0.0, 0.0];

        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }

    #[tokio::test]
    async fn test_metadata_filter_restricts_results() {
        let store = InMemoryStore::new(Arc::new(HistogramEmbedding));

        let mut finance = Metadata::new();
        finance.insert("topic".to_string(), serde_json::json!("finance"));
        let mut sports = Metadata::new();
        sports.insert("topic".to_string(), serde_json::json!("sports"));

        store
            .add_texts(
                vec!["market report".to_string(), "match report".to_string()],
                Some(vec![finance.clone(), sports]),
                None,
            )
            .await
            .unwrap();

        let results = store.search("report", 5, Some(&finance)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "market report");
    }

    #[test]
    fn test_point_id_passes_uuids_through() {
        let id = "6c1f2b9e-3d44-4b87-9a1e-0f5c8d2a7b13";
        assert_eq!(crate::storage::qdrant_point_id(id), id);
    }

    #[test]
    fn test_point_id_maps_arbitrary_strings_to_uuids() {
        let point_id = crate::storage::qdrant_point_id("custom-id");

        // Qdrant rejects anything that is not a UUID or an unsigned int.
        assert!(uuid::Uuid::parse_str(&point_id).is_ok());
        assert_ne!(point_id, "custom-id");
    }

    #[test]
    fn test_point_id_is_deterministic_per_external_id() {
        let first = crate::storage::qdrant_point_id("custom-id");
        let second = crate::storage::qdrant_point_id("custom-id");
        let other = crate::storage::qdrant_point_id("another-id");

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_caller_supplied_ids_are_used_verbatim() {
        let store = InMemoryStore::new(Arc::new(HistogramEmbedding));

        let ids = store
            .add_texts(
                vec!["hello".to_string()],
                None,
                Some(vec!["custom-id".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(ids, vec!["custom-id".to_string()]);
        let results = store.search("hello", 1, None).await.unwrap();
        assert_eq!(results[0].id, "custom-id");
    }
}

mod embedding_tests {
    use crate::embedding::EmbeddingCache;

    #[test]
    fn test_cache_returns_hits() {
        let cache = EmbeddingCache::new(10);
        cache.insert(1, vec![0.1, 0.2]);

        assert_eq!(cache.get(1), Some(vec![0.1, 0.2]));
        assert_eq!(cache.get(2), None);
    }

    #[test]
    fn test_cache_flushes_at_capacity() {
        let cache = EmbeddingCache::new(2);
        cache.insert(1, vec![0.1]);
        cache.insert(2, vec![0.2]);
        assert_eq!(cache.len(), 2);

        // A new key above capacity flushes the map first.
        cache.insert(3, vec![0.3]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(3), Some(vec![0.3]));
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn test_cache_rewrite_of_existing_key_does_not_flush() {
        let cache = EmbeddingCache::new(2);
        cache.insert(1, vec![0.1]);
        cache.insert(2, vec![0.2]);

        cache.insert(2, vec![0.9]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1), Some(vec![0.1]));
        assert_eq!(cache.get(2), Some(vec![0.9]));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = EmbeddingCache::new(0);
        cache.insert(1, vec![0.1]);

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(1), None);
    }
}

mod config_tests {
    use crate::config::RagConfig;

    #[test]
    fn test_default_config() {
        let config = RagConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.embedding.model_id,
            "sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(config.storage.collection_name, "documents");
        assert!(config.generation.temperature >= 0.0);
        assert!(config.generation.api_key.is_none());
    }
}

mod generation_tests {
    use crate::generation::{ChatMessage, Role};

    #[test]
    fn test_message_constructors() {
        let system = ChatMessage::system("be brief");
        let user = ChatMessage::user("hello");

        assert_eq!(system.role, Role::System);
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let message = ChatMessage::user("hi");
        let json = serde_json::to_string(&message).unwrap();

        assert!(json.contains("\"role\":\"user\""));
    }
}

mod api_tests {
    use crate::api::{map_error, AddTextsRequest, ChatRequest};
    use crate::RagError;

    #[test]
    fn test_chat_request_accepts_camel_case() {
        let json = r#"{"message": "hi", "maxResults": 3, "systemPrompt": "be brief"}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.message, "hi");
        assert_eq!(request.max_results, Some(3));
        assert_eq!(request.system_prompt, Some("be brief".to_string()));
    }

    #[test]
    fn test_chat_request_optional_fields_default_to_none() {
        let json = r#"{"message": "hi"}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.max_results, None);
        assert_eq!(request.system_prompt, None);
    }

    #[test]
    fn test_errors_map_to_their_stage_code() {
        let (status, body) = map_error(RagError::Ingestion("store rejected write".to_string()));
        assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "INGESTION_ERROR");

        let (_, body) = map_error(RagError::Retrieval("store unreachable".to_string()));
        assert_eq!(body.code, "RETRIEVAL_ERROR");

        let (_, body) = map_error(RagError::Generation("no content".to_string()));
        assert_eq!(body.code, "GENERATION_ERROR");
    }

    #[test]
    fn test_add_texts_request_round_trip() {
        let json = r#"{"texts": ["a", "b"], "ids": ["1", "2"]}"#;
        let request: AddTextsRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.texts.len(), 2);
        assert_eq!(request.ids, Some(vec!["1".to_string(), "2".to_string()]));
        assert!(request.metadata.is_none());
    }
}
