use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;

use super::types::ExtractedUnit;
use super::ExtractionPass;

/// A source that named a field its unit does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedSource {
    /// 1-based, matching the evidence key scheme.
    pub unit_index: usize,
    pub field: String,
}

/// Units exactly as one pass returned them, before merging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassResult {
    pub pass: String,
    pub units: Vec<ExtractedUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub units: Vec<ExtractedUnit>,
    pub dropped_sources: Vec<DroppedSource>,
    /// Raw per-pass output, in pass order.
    pub pass_results: Vec<PassResult>,
}

/// Runs the configured passes in order and merges their units.
///
/// A failing pass fails the whole extraction; nothing is retried here.
pub struct ExtractionOrchestrator {
    passes: Vec<Arc<dyn ExtractionPass>>,
}

impl ExtractionOrchestrator {
    pub fn new(passes: Vec<Arc<dyn ExtractionPass>>) -> Self {
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub async fn extract(
        &self,
        job_id: &str,
        document: &[u8],
    ) -> Result<Extraction, ExtractionError> {
        if self.passes.is_empty() {
            return Err(ExtractionError::NoPasses);
        }

        let mut pass_results = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let units = pass.extract(job_id, document).await?;
            debug!("Pass '{}' returned {} unit(s)", pass.name(), units.len());
            pass_results.push(PassResult {
                pass: pass.name().to_string(),
                units,
            });
        }

        let mut extraction = merge_passes(pass_results.iter().map(|r| r.units.clone()).collect());
        extraction.pass_results = pass_results;
        info!(
            "Extracted {} unit(s) from {} pass(es)",
            extraction.units.len(),
            self.passes.len()
        );
        Ok(extraction)
    }
}

/// Merges pass outputs by unit index.
///
/// Earlier passes win on field and confidence collisions. A field is sourced
/// at most once per unit. Units that only a later pass found are appended.
/// Sources naming a field absent from their unit are dropped and reported.
pub fn merge_passes(outputs: Vec<Vec<ExtractedUnit>>) -> Extraction {
    let mut merged: Vec<ExtractedUnit> = Vec::new();

    for units in outputs {
        for (index, incoming) in units.into_iter().enumerate() {
            match merged.get_mut(index) {
                Some(existing) => {
                    for (field, value) in incoming.unit.fields {
                        existing.unit.fields.entry(field).or_insert(value);
                    }
                    for (field, rating) in incoming.unit.confidence {
                        existing.unit.confidence.entry(field).or_insert(rating);
                    }
                    existing.sources.extend(incoming.sources);
                }
                None => merged.push(incoming),
            }
        }
    }

    let mut dropped_sources = Vec::new();
    for (index, extracted) in merged.iter_mut().enumerate() {
        let mut sourced = HashSet::new();
        let unit = &extracted.unit;
        extracted.sources.retain(|source| {
            if !unit.has_field(&source.field) {
                warn!(
                    "Dropping source for unknown field '{}' in unit {}",
                    source.field,
                    index + 1
                );
                dropped_sources.push(DroppedSource {
                    unit_index: index + 1,
                    field: source.field.clone(),
                });
                return false;
            }
            sourced.insert(source.field.clone())
        });
    }

    Extraction {
        units: merged,
        dropped_sources,
        pass_results: Vec::new(),
    }
}
