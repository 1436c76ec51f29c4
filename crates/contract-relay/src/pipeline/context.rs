use std::path::PathBuf;

use crate::extraction::Extraction;
use crate::notification::{DeliveryRecord, NotificationPayload};
use crate::queue::JobDescriptor;
use crate::storage::FieldEvidence;

use super::error::PipelineWarning;

pub struct PipelineContext {
    // Input
    pub job: JobDescriptor,

    // Step 1 result
    pub document_size: Option<usize>,

    // Step 2 result
    pub extraction: Option<Extraction>,

    // Step 3 result, one entry per unit
    pub evidence: Vec<Vec<FieldEvidence>>,

    // Step 4 result
    pub payload: Option<NotificationPayload>,
    pub payload_path: Option<PathBuf>,

    // Step 5 result
    pub delivery: Option<DeliveryRecord>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: JobDescriptor) -> Self {
        let warnings = job
            .ignored_bucket_name
            .iter()
            .map(|value| PipelineWarning::IgnoredBucketName {
                value: value.clone(),
            })
            .collect();

        Self {
            job,
            document_size: None,
            extraction: None,
            evidence: Vec::new(),
            payload: None,
            payload_path: None,
            delivery: None,
            warnings,
        }
    }
}
