//! Shared types used across modules
//!
//! The interaction log, the router and the review pipeline all exchange
//! these types, so they live here to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id of a logged interaction
pub type InteractionId = i64;

/// Verdict of the quality oracle for one interaction
///
/// Stored as a nullable integer: NULL = unset, 0 = match, 1 = mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OracleFlag {
    #[default]
    Unset,
    Match,
    Mismatch,
}

impl OracleFlag {
    /// Column value for this flag
    pub fn to_db(self) -> Option<i64> {
        match self {
            OracleFlag::Unset => None,
            OracleFlag::Match => Some(0),
            OracleFlag::Mismatch => Some(1),
        }
    }

    /// Decode the column value; anything other than 0 counts as a mismatch
    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            None => OracleFlag::Unset,
            Some(0) => OracleFlag::Match,
            Some(_) => OracleFlag::Mismatch,
        }
    }

    pub fn is_set(self) -> bool {
        self != OracleFlag::Unset
    }
}

impl std::fmt::Display for OracleFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleFlag::Unset => write!(f, "unset"),
            OracleFlag::Match => write!(f, "match"),
            OracleFlag::Mismatch => write!(f, "mismatch"),
        }
    }
}

/// One logged message/response exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: InteractionId,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub message: String,
    pub response: String,
    /// Tag chosen by the classifier; `None` when the retrieval path answered
    pub predicted_intent: Option<String>,
    pub confidence: f64,
    /// Tag assigned by a human reviewer; `None` until reviewed
    pub corrected_intent: Option<String>,
    pub gemini_flag: OracleFlag,
    pub gemini_feedback: Option<String>,
}

/// Fields supplied when appending a new interaction
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub user_id: Option<String>,
    pub message: String,
    pub response: String,
    pub predicted_intent: Option<String>,
    pub confidence: f64,
}

/// A previous (message, response) pair used as conversational context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub message: String,
    pub response: String,
}

/// One classifier output entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub intent: String,
    pub probability: f64,
}

impl Prediction {
    pub fn new(intent: impl Into<String>, probability: f64) -> Self {
        Self {
            intent: intent.into(),
            probability,
        }
    }
}

/// Catalog entry used for the product-listing template and the retrieval index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl Product {
    /// Plain-text document for embedding and prompt context
    pub fn to_document(&self) -> String {
        let mut doc = format!("{}.", self.name);
        if let Some(category) = &self.category {
            doc.push_str(&format!(" Category: {}.", category));
        }
        if let Some(description) = &self.description {
            doc.push_str(&format!(" Description: {}.", description));
        }
        if let Some(price) = self.price {
            doc.push_str(&format!(" Price: {}.", price));
        }
        doc
    }
}
