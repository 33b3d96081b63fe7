//! Error types for payer-group ingestion.
//!
//! Input problems (bad sheets, missing columns) are logged and skipped by the
//! loader; only the variants below ever reach a caller.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the store gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot merge group {source_id} into {target_id}")]
    InvalidMerge { source_id: i64, target_id: i64 },

    #[error("Unique key conflict on {entity} '{key}' but no existing row could be re-read")]
    Conflict { entity: &'static str, key: String },
}

/// Errors raised by the ingestion entry point.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open workbook {path:?}: {message}")]
    OpenWorkbook { path: PathBuf, message: String },

    #[error("Failed to read sheet '{sheet}': {message}")]
    Sheet { sheet: String, message: String },

    #[error("Store failure during {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub fn store(stage: &'static str, source: impl Into<StoreError>) -> Self {
        IngestError::Store {
            stage,
            source: source.into(),
        }
    }

    /// Stage label for reporting a failed run
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::OpenWorkbook { .. } => "load",
            IngestError::Sheet { .. } => "load",
            IngestError::Store { stage, .. } => stage,
        }
    }
}
