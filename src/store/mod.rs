//! Interaction Store
//!
//! Append-only log of every message/response exchange, persisted in SQLite.
//! Provides:
//! - Atomic per-row appends and annotations
//! - Conditional oracle annotation (unset -> match/mismatch, never back)
//! - Review queues over uncorrected rows
//! - Batched human corrections with a savepoint per interaction

pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::types::InteractionId;

pub use sqlite::InteractionStore;

/// Selection criterion for the general review queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewScope {
    /// Every row not yet reviewed by a human, regardless of the oracle verdict
    #[default]
    AllUncorrected,
    /// Unreviewed rows the oracle has not looked at yet
    Unevaluated,
    /// Unreviewed rows the oracle did not mark as a mismatch
    NotFlagged,
}

impl ReviewScope {
    /// Extra WHERE clause appended to `corrected_intent IS NULL`
    pub(crate) fn sql_filter(self) -> &'static str {
        match self {
            ReviewScope::AllUncorrected => "",
            ReviewScope::Unevaluated => " AND gemini_flag IS NULL",
            ReviewScope::NotFlagged => " AND (gemini_flag IS NULL OR gemini_flag = 0)",
        }
    }
}

impl std::fmt::Display for ReviewScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewScope::AllUncorrected => write!(f, "all_uncorrected"),
            ReviewScope::Unevaluated => write!(f, "unevaluated"),
            ReviewScope::NotFlagged => write!(f, "not_flagged"),
        }
    }
}

/// Result of writing an oracle verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOutcome {
    Written,
    /// Another evaluator annotated the row first
    AlreadyAnnotated,
    NotFound,
}

/// A correction whose interaction-store write succeeded inside the open batch
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCorrection {
    pub id: InteractionId,
    pub tag: String,
    pub message: String,
}

/// Per-id result of a correction batch
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Applied(AppliedCorrection),
    /// The row already carried this exact tag; nothing was written
    Unchanged { id: InteractionId },
    NotFound { id: InteractionId },
    Conflict { id: InteractionId, existing: String },
    Failed { id: InteractionId, reason: String },
}

impl CorrectionOutcome {
    pub fn id(&self) -> InteractionId {
        match self {
            CorrectionOutcome::Applied(applied) => applied.id,
            CorrectionOutcome::Unchanged { id }
            | CorrectionOutcome::NotFound { id }
            | CorrectionOutcome::Conflict { id, .. }
            | CorrectionOutcome::Failed { id, .. } => *id,
        }
    }
}

/// Interaction log statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionStats {
    pub total: usize,
    pub unevaluated: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub corrected: usize,
}
