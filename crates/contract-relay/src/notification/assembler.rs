//! Pure assembly of the notification payload.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::extraction::{Confidence, ExtractionUnit, SourceReference};
use crate::storage::FieldEvidence;

use super::payload::{NotificationPayload, PayloadSource, PayloadStatus, PayloadUnit};

/// Ceiling applied to fields whose evidence could not be stored.
pub const DEGRADED_CEILING: Confidence = Confidence::Medium;

/// Builds the payload for a job, stamped with the current UTC instant.
///
/// `sources` and `confidences` are indexed like `units`; missing entries are
/// treated as empty.
pub fn assemble(
    job_id: &str,
    bucket_name: &str,
    units: &[ExtractionUnit],
    sources: &[Vec<SourceReference>],
    confidences: &[IndexMap<String, Confidence>],
    status: PayloadStatus,
) -> NotificationPayload {
    assemble_at(
        job_id,
        bucket_name,
        units,
        sources,
        confidences,
        status,
        Utc::now(),
    )
}

pub fn assemble_at(
    job_id: &str,
    bucket_name: &str,
    units: &[ExtractionUnit],
    sources: &[Vec<SourceReference>],
    confidences: &[IndexMap<String, Confidence>],
    status: PayloadStatus,
    processed_at: DateTime<Utc>,
) -> NotificationPayload {
    let units = units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            let unit_sources = sources.get(index).map(Vec::as_slice).unwrap_or_default();
            let confidence = confidences.get(index).unwrap_or(&unit.confidence);
            PayloadUnit {
                unit: unit.fields.clone(),
                sources: pair_sources(unit, unit_sources),
                confidence: complete_confidence(unit, confidence),
            }
        })
        .collect();

    NotificationPayload {
        job_id: job_id.to_string(),
        bucket_name: bucket_name.to_string(),
        status,
        processed_at,
        units,
    }
}

/// An error payload with no units.
pub fn assemble_error(job_id: &str, bucket_name: &str) -> NotificationPayload {
    assemble(job_id, bucket_name, &[], &[], &[], PayloadStatus::Error)
}

/// Exactly one source per field: reported sources first, in order, then a
/// null-keyed entry for each field nobody sourced.
fn pair_sources(unit: &ExtractionUnit, sources: &[SourceReference]) -> Vec<PayloadSource> {
    let mut paired: Vec<PayloadSource> = Vec::with_capacity(unit.fields.len());

    for source in sources {
        if !unit.has_field(&source.field) || paired.iter().any(|p| p.field == source.field) {
            continue;
        }
        paired.push(PayloadSource {
            field: source.field.clone(),
            chunk_file_key: source.storage_key.clone(),
        });
    }

    for field in unit.fields.keys() {
        if !paired.iter().any(|p| &p.field == field) {
            paired.push(PayloadSource {
                field: field.clone(),
                chunk_file_key: None,
            });
        }
    }

    paired
}

/// Confidence keyed exactly by the unit's fields, in field order. Unrated
/// fields are `low`.
fn complete_confidence(
    unit: &ExtractionUnit,
    confidence: &IndexMap<String, Confidence>,
) -> IndexMap<String, Confidence> {
    unit.fields
        .keys()
        .map(|field| {
            let rating = confidence.get(field).copied().unwrap_or(Confidence::Low);
            (field.clone(), rating)
        })
        .collect()
}

/// Caps the rating of every field whose evidence was not stored.
pub fn degrade_confidence(
    confidence: &IndexMap<String, Confidence>,
    evidence: &[FieldEvidence],
) -> IndexMap<String, Confidence> {
    let mut degraded = confidence.clone();
    for item in evidence.iter().filter(|e| !e.is_stored()) {
        if let Some(rating) = degraded.get_mut(&item.field) {
            *rating = rating.capped_at(DEGRADED_CEILING);
        }
    }
    degraded
}
