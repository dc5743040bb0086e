use serde::Serialize;

use super::{BatchId, SourceKind};
use crate::sinks::StoreError;

/// A field could not be parsed or converted.
///
/// On a measurement field the field is nulled and the record survives; on a
/// key field the Normalizer rejects the record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[error("malformed field '{field}': {reason}")]
pub struct MalformedRecordError {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// A key field failed validation; the record is excluded from the batch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[error("invalid key field '{field}': {reason}")]
pub struct InvalidKeyError {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidKeyError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The storage transaction for a batch failed or timed out. Nothing from the
/// batch was persisted; retrying the same batch is safe.
#[derive(thiserror::Error, Debug)]
#[error("batch {batch_id} ({key_count} keys) failed after {attempts} attempt(s): {cause}")]
pub struct BatchWriteError {
    pub batch_id: BatchId,
    pub key_count: usize,
    pub attempts: u32,
    #[source]
    pub cause: StoreError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    Malformed(MalformedRecordError),
    InvalidKey(InvalidKeyError),
}

impl RejectionReason {
    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Malformed(_) => "malformed_key",
            RejectionReason::InvalidKey(_) => "invalid_key",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::Malformed(e) => e.fmt(f),
            RejectionReason::InvalidKey(e) => e.fmt(f),
        }
    }
}

/// A record excluded from a batch, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRejection {
    /// Position of the raw record in the submitted batch.
    pub index: usize,
    pub source: SourceKind,
    pub asset_id: Option<String>,
    pub reason: RejectionReason,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
}
