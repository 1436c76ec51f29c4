use thiserror::Error;

use crate::error::{ExtractionError, StorageError};

/// Job-level failures. Any of these leaves the message undeleted so the
/// queue redelivers it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to fetch source document: {0}")]
    Fetch(StorageError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Failed to persist notification payload: {0}")]
    Persist(StorageError),

    #[error("Invocation exceeded the timeout of {0:?}")]
    TimedOut(std::time::Duration),
}

/// Non-fatal conditions recorded while processing a job.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    IgnoredBucketName { value: String },
    DroppedSource { unit_index: usize, field: String },
    EvidenceUnavailable { unit_index: usize, field: String, reason: String },
    DeliveryRecordNotWritten { error: String },
    ArtifactNotWritten { artifact: String, error: String },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::IgnoredBucketName { value } => {
                write!(f, "ignored bucket_name '{}' from message body", value)
            }
            PipelineWarning::DroppedSource { unit_index, field } => {
                write!(f, "dropped source for unknown field '{}' in unit {}", field, unit_index)
            }
            PipelineWarning::EvidenceUnavailable {
                unit_index,
                field,
                reason,
            } => write!(
                f,
                "no evidence for '{}' in unit {}: {}",
                field, unit_index, reason
            ),
            PipelineWarning::DeliveryRecordNotWritten { error } => {
                write!(f, "delivery record not written: {}", error)
            }
            PipelineWarning::ArtifactNotWritten { artifact, error } => {
                write!(f, "{} not written: {}", artifact, error)
            }
        }
    }
}
