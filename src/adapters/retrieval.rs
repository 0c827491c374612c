//! Retrieval-augmented fallback answers
//!
//! Catalog products are embedded into an in-memory vector index. A query is
//! embedded, the closest documents become the prompt context, and the LLM
//! answers with the recent conversation in view.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AnswerGenerator, ChatMessage, LlmClient, ProductCatalog};
use crate::types::HistoryTurn;

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Flat in-memory vector index
#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: String, embedding: Vec<f32>) {
        self.entries.push((document, embedding));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` documents most similar to `query`, best first
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&str, f32)> {
        let mut scored: Vec<(&str, f32)> = self
            .entries
            .iter()
            .map(|(doc, embedding)| (doc.as_str(), cosine_similarity(query, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Assemble the generation prompt; `history` arrives newest first
pub fn build_prompt(history: &[HistoryTurn], context: &str, question: &str) -> String {
    let history_text = history
        .iter()
        .rev()
        .map(|turn| format!("User: {}\nBot: {}", turn.message, turn.response))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Act as a shop assistant. Based on the conversation, the context and the question, \
         give the most natural-sounding answer.\n\
         {}\n\
         Context:\n{}\n\
         Question: {}\n\
         Answer:",
        history_text, context, question
    )
}

pub struct RagGenerator {
    llm: LlmClient,
    index: RwLock<VectorIndex>,
    top_k: usize,
}

impl RagGenerator {
    pub fn new(llm: LlmClient, top_k: usize) -> Self {
        Self {
            llm,
            index: RwLock::new(VectorIndex::new()),
            top_k,
        }
    }

    /// Rebuild the index from the current catalog
    pub async fn index_catalog(&self, catalog: &dyn ProductCatalog) -> Result<usize> {
        let documents: Vec<String> = catalog
            .list_products()
            .await?
            .iter()
            .map(|p| p.to_document())
            .collect();

        let embeddings = self.llm.embed(&documents).await?;

        let mut index = VectorIndex::new();
        for (document, embedding) in documents.into_iter().zip(embeddings) {
            index.insert(document, embedding);
        }

        let count = index.len();
        *self.index.write().await = index;
        info!(documents = count, "Indexed catalog for retrieval");
        Ok(count)
    }

    async fn retrieve_context(&self, query: &str) -> Result<String> {
        let index = self.index.read().await;
        if index.is_empty() {
            return Ok(String::new());
        }

        let query_embedding = self
            .llm
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let hits = index.search(&query_embedding, self.top_k);
        debug!(hits = hits.len(), "Retrieved context documents");
        Ok(hits
            .into_iter()
            .map(|(doc, _)| doc)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[async_trait]
impl AnswerGenerator for RagGenerator {
    async fn answer(&self, query: &str, history: &[HistoryTurn]) -> Result<String> {
        let context = self.retrieve_context(query).await?;
        let prompt = build_prompt(history, &context, query);
        self.llm.complete(&[ChatMessage::user(prompt)]).await
    }
}
