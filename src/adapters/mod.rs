//! External collaborators
//!
//! The core only depends on these traits:
//! - `IntentClassifier`: trained intent model inference
//! - `AnswerGenerator`: retrieval-augmented fallback answers
//! - `QualityOracle`: judges whether a logged answer fit its question
//! - `ProductCatalog`: live product listing for the catalog intent
//!
//! HTTP-backed implementations live in the submodules.

pub mod catalog;
pub mod classifier;
pub mod llm;
pub mod oracle;
pub mod retrieval;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{HistoryTurn, Prediction, Product};

pub use catalog::HttpCatalog;
pub use classifier::HttpClassifier;
pub use llm::{ChatMessage, LlmClient};
pub use oracle::LlmOracle;
pub use retrieval::{RagGenerator, VectorIndex};

/// Intent classifier inference
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Entries above the acceptance threshold, highest probability first
    async fn predict(&self, text: &str) -> Result<Vec<Prediction>>;
}

/// Retrieval-and-generation fallback
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `query` given the most recent exchanges (newest first)
    async fn answer(&self, query: &str, history: &[HistoryTurn]) -> Result<String>;
}

/// Quality oracle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualityOracle: Send + Sync {
    /// Raw oracle output for a question/answer pair; expected to hold
    /// `{"match": "yes"|"no", "explanation": "..."}` but may be anything
    async fn judge(&self, question: &str, answer: &str) -> Result<String>;
}

/// Product catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>>;
}
