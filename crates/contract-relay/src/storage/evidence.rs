//! Rendering and upload of per-field visual evidence.

use std::sync::{Arc, LazyLock};

use futures_util::stream::{self, StreamExt};
use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};

use crate::extraction::{EvidenceRenderer, ExtractedUnit, SourceReference, SourceRegion};

use super::object_store::ObjectStore;

static RE_KEY_SAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

/// Deterministic evidence key: `contracts/{job_id}/unit_{unit_index}/{field}.png`.
///
/// `unit_index` is 1-based. Returns `None` for field names that cannot be a
/// single key segment.
pub fn evidence_key(job_id: &str, unit_index: usize, field: &str) -> Option<String> {
    if !RE_KEY_SAFE.is_match(field) || field == "." || field == ".." {
        return None;
    }
    Some(format!("contracts/{}/unit_{}/{}.png", job_id, unit_index, field))
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceOutcome {
    Stored { uri: String },
    /// The pass reported no page region for the field.
    NoRegion,
    UnsafeField,
    Failed { error: String },
}

/// Evidence capture result for one sourced field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEvidence {
    pub unit_index: usize,
    pub field: String,
    pub region: Option<SourceRegion>,
    pub outcome: EvidenceOutcome,
}

impl FieldEvidence {
    pub fn storage_key(&self) -> Option<&str> {
        match &self.outcome {
            EvidenceOutcome::Stored { uri } => Some(uri),
            _ => None,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self.outcome, EvidenceOutcome::Stored { .. })
    }

    pub fn to_reference(&self) -> SourceReference {
        SourceReference {
            field: self.field.clone(),
            storage_key: self.storage_key().map(str::to_string),
            region: self.region,
        }
    }
}

/// Stored evidence keyed `unit{n}_{field}`, in unit then source order.
/// Fields without stored evidence are left out.
pub fn evidence_manifest(evidence: &[Vec<FieldEvidence>]) -> IndexMap<String, Vec<String>> {
    let mut manifest: IndexMap<String, Vec<String>> = IndexMap::new();
    for item in evidence.iter().flatten() {
        if let Some(uri) = item.storage_key() {
            manifest
                .entry(format!("unit{}_{}", item.unit_index, item.field))
                .or_default()
                .push(uri.to_string());
        }
    }
    manifest
}

/// Renders and uploads one crop per sourced field with bounded concurrency.
pub struct EvidenceCapture {
    renderer: Arc<dyn EvidenceRenderer>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    concurrency: usize,
}

struct CaptureTask<'a> {
    unit_index: usize,
    field: &'a str,
    region: Option<SourceRegion>,
}

impl EvidenceCapture {
    pub fn new(
        renderer: Arc<dyn EvidenceRenderer>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            renderer,
            store,
            bucket: bucket.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Captures evidence for every source of every unit. The result has one
    /// entry per unit, each in source order.
    pub async fn capture(
        &self,
        job_id: &str,
        document: &[u8],
        units: &[ExtractedUnit],
    ) -> Vec<Vec<FieldEvidence>> {
        let tasks: Vec<CaptureTask<'_>> = units
            .iter()
            .enumerate()
            .flat_map(|(index, extracted)| {
                extracted.sources.iter().map(move |source| CaptureTask {
                    unit_index: index + 1,
                    field: &source.field,
                    region: source.region,
                })
            })
            .collect();

        let results: Vec<FieldEvidence> = stream::iter(tasks)
            .map(|task| self.capture_one(job_id, document, task))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut per_unit: Vec<Vec<FieldEvidence>> = vec![Vec::new(); units.len()];
        for evidence in results {
            if let Some(slot) = per_unit.get_mut(evidence.unit_index - 1) {
                slot.push(evidence);
            }
        }
        per_unit
    }

    async fn capture_one(
        &self,
        job_id: &str,
        document: &[u8],
        task: CaptureTask<'_>,
    ) -> FieldEvidence {
        let outcome = match (evidence_key(job_id, task.unit_index, task.field), task.region) {
            (None, _) => {
                warn!(
                    "Field name '{}' in unit {} is not key-safe; no evidence stored",
                    task.field, task.unit_index
                );
                EvidenceOutcome::UnsafeField
            }
            (Some(_), None) => EvidenceOutcome::NoRegion,
            (Some(key), Some(region)) => self.render_and_store(document, &key, &region).await,
        };

        FieldEvidence {
            unit_index: task.unit_index,
            field: task.field.to_string(),
            region: task.region,
            outcome,
        }
    }

    async fn render_and_store(
        &self,
        document: &[u8],
        key: &str,
        region: &SourceRegion,
    ) -> EvidenceOutcome {
        let png = match self.renderer.render(document, region).await {
            Ok(png) => png,
            Err(e) => {
                warn!("Evidence rendering failed for {}: {}", key, e);
                return EvidenceOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        match self.store.put(&self.bucket, key, png).await {
            Ok(stored) => {
                debug!("Evidence stored at {}", stored.uri);
                EvidenceOutcome::Stored { uri: stored.uri }
            }
            Err(e) => {
                warn!("Evidence upload failed for {}: {}", key, e);
                EvidenceOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
