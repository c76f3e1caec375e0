use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::generation::{ChatMessage, GenerationProvider};
use crate::prompt;
use crate::storage::{DocumentInput, Metadata, Record, ScoredRecord, VectorStore};
use crate::Result;

pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Output of one answered query: generated text plus the evidence used, in
/// store rank order. `sources.len()` always equals what the store returned
/// for the call, never padded to k.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredAnswerResult {
    pub answer: String,
    pub sources: Vec<ScoredRecord>,
}

/// Orchestrates ingestion and question answering over a vector store and a
/// generation provider. Stateless across calls: every `answer*` invocation
/// is retrieve-then-generate with nothing retained in between.
pub struct RagPipeline {
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn GenerationProvider>,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn VectorStore>, generator: Arc<dyn GenerationProvider>) -> Self {
        Self { store, generator }
    }

    /// Store documents; returns assigned ids in input order. The store
    /// determines batch atomicity; a rejected batch surfaces as a single
    /// ingestion error with no per-item retry.
    pub async fn ingest_documents(&self, documents: Vec<DocumentInput>) -> Result<Vec<String>> {
        let count = documents.len();
        let ids = self.store.add_documents(documents).await?;
        info!(count, "Ingested documents");
        Ok(ids)
    }

    /// Store raw texts with optional per-text metadata and ids. A metadata
    /// list shorter than `texts` is padded with empty maps rather than
    /// rejected.
    pub async fn ingest_texts(
        &self,
        texts: Vec<String>,
        metadata: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let count = texts.len();
        let ids = self.store.add_texts(texts, metadata, ids).await?;
        info!(count, "Ingested texts");
        Ok(ids)
    }

    /// Answer a question grounded in the top-`max_results` retrieved
    /// records. A caller-supplied `system_prompt` replaces the default
    /// grounding template entirely.
    pub async fn answer(
        &self,
        query: &str,
        max_results: usize,
        system_prompt: Option<&str>,
    ) -> Result<AnswerResult> {
        info!(query, max_results, "Processing RAG query");

        let sources = self.store.search(query, max_results, None).await?;
        info!(count = sources.len(), "Retrieved relevant records");

        let answer = self.generate(query, &sources, system_prompt).await?;

        Ok(AnswerResult { answer, sources })
    }

    /// Same as [`answer`](Self::answer) but each source carries its
    /// similarity score. Scores never enter the prompt.
    pub async fn answer_with_scores(
        &self,
        query: &str,
        max_results: usize,
        system_prompt: Option<&str>,
    ) -> Result<ScoredAnswerResult> {
        info!(query, max_results, "Processing RAG query with scores");

        let sources = self
            .store
            .search_with_score(query, max_results, None)
            .await?;
        info!(count = sources.len(), "Retrieved scored records");

        let records: Vec<Record> = sources.iter().map(|s| s.record.clone()).collect();
        let answer = self.generate(query, &records, system_prompt).await?;

        Ok(ScoredAnswerResult { answer, sources })
    }

    /// Remove all ingested records. Idempotent; the store is empty on
    /// success.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        info!("Cleared all records from RAG system");
        Ok(())
    }

    async fn generate(
        &self,
        query: &str,
        sources: &[Record],
        system_prompt: Option<&str>,
    ) -> Result<String> {
        let prompt = prompt::build_prompt(query, sources, system_prompt);
        let messages = [ChatMessage::user(prompt)];
        self.generator.generate(&messages).await
    }
}
