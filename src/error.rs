//! Typed errors for the interaction log and the intent dataset

use std::path::PathBuf;
use thiserror::Error;

use crate::types::InteractionId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interaction {0} not found")]
    NotFound(InteractionId),

    #[error("interaction {id} already corrected to '{existing}'")]
    Conflict { id: InteractionId, existing: String },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read intents document {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write intents document {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed intents document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("intents document changed on disk (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },

    #[error("interaction store error: {0}")]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type DatasetResult<T> = std::result::Result<T, DatasetError>;
