//! Fake collaborators and builders for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use contract_relay::error::{DeliveryError, ExtractionError};
use contract_relay::extraction::{
    EvidenceRenderer, ExtractedUnit, ExtractionPass, FieldSource, SourceRegion,
};
use contract_relay::notification::NotificationChannel;
use contract_relay::{Confidence, NotificationPayload};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nevidence";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\nfake contract\n%%EOF";

/// Builder for one extracted unit.
#[derive(Default)]
pub struct UnitBuilder {
    unit: ExtractedUnit,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field with a rating and a source region on `page`.
    pub fn field(mut self, name: &str, value: Value, rating: Confidence, page: u32) -> Self {
        self = self.unsourced_field(name, value, rating);
        self.unit.sources.push(FieldSource {
            field: name.to_string(),
            chunk_id: Some(format!("chunk-{}", page)),
            region: Some(region(page)),
        });
        self
    }

    /// Adds a field the pass reported no source for.
    pub fn unsourced_field(mut self, name: &str, value: Value, rating: Confidence) -> Self {
        self.unit.unit.fields.insert(name.to_string(), value);
        self.unit.unit.confidence.insert(name.to_string(), rating);
        self
    }

    /// Adds a field without any confidence rating.
    pub fn unrated_field(mut self, name: &str, value: Value) -> Self {
        self.unit.unit.fields.insert(name.to_string(), value);
        self
    }

    /// Adds a source naming a field that is not part of the unit.
    pub fn stray_source(mut self, name: &str) -> Self {
        self.unit.sources.push(FieldSource {
            field: name.to_string(),
            chunk_id: None,
            region: Some(region(1)),
        });
        self
    }

    pub fn build(self) -> ExtractedUnit {
        self.unit
    }
}

pub fn region(page: u32) -> SourceRegion {
    SourceRegion {
        page,
        bbox: [10.0, 20.0, 200.0, 60.0],
    }
}

/// The two-field lease contract used across scenarios.
pub fn lease_unit() -> ExtractedUnit {
    UnitBuilder::new()
        .field("tenant", json!("Acme Ltd"), Confidence::High, 1)
        .field("monthly_rent", json!(1200), Confidence::High, 2)
        .build()
}

pub fn job_body(contract_id: &str, file_key: &str) -> String {
    json!({ "file_key": file_key, "contract_id": contract_id }).to_string()
}

pub fn document_key(contract_id: &str) -> String {
    format!("incoming/{}.pdf", contract_id)
}

/// Pass returning the same units for every job.
pub struct StaticPass {
    name: String,
    units: Vec<ExtractedUnit>,
    calls: AtomicU32,
}

impl StaticPass {
    pub fn new(name: &str, units: Vec<ExtractedUnit>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            units,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionPass for StaticPass {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        _job_id: &str,
        _document: &[u8],
    ) -> Result<Vec<ExtractedUnit>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.units.clone())
    }
}

/// Pass that fails on every call.
pub struct FailingPass {
    calls: AtomicU32,
}

impl FailingPass {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionPass for FailingPass {
    fn name(&self) -> &str {
        "failing"
    }

    async fn extract(
        &self,
        _job_id: &str,
        _document: &[u8],
    ) -> Result<Vec<ExtractedUnit>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractionError::PassFailed {
            pass: "failing".to_string(),
            message: "model unavailable".to_string(),
        })
    }
}

/// Pass that sleeps before answering.
pub struct SlowPass {
    delay: Duration,
}

impl SlowPass {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

#[async_trait]
impl ExtractionPass for SlowPass {
    fn name(&self) -> &str {
        "slow"
    }

    async fn extract(
        &self,
        _job_id: &str,
        _document: &[u8],
    ) -> Result<Vec<ExtractedUnit>, ExtractionError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![lease_unit()])
    }
}

/// Renderer returning a fixed PNG, or failing for every region.
pub struct PngRenderer {
    fail: bool,
}

impl PngRenderer {
    pub fn working() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl EvidenceRenderer for PngRenderer {
    async fn render(
        &self,
        _document: &[u8],
        region: &SourceRegion,
    ) -> Result<Vec<u8>, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::Render(format!(
                "renderer offline for page {}",
                region.page
            )));
        }
        Ok(PNG_BYTES.to_vec())
    }
}

/// Records every published payload. Queued failures are returned first.
#[derive(Default)]
pub struct RecordingChannel {
    failures: Mutex<VecDeque<DeliveryError>>,
    published: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(failures: Vec<DeliveryError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(String, NotificationPayload)> {
        self.published.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.published().into_iter().map(|(_, p)| p).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn describe(&self) -> String {
        "recording".to_string()
    }

    async fn publish(
        &self,
        subject: &str,
        payload: &NotificationPayload,
    ) -> Result<String, DeliveryError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut published = self.published.lock().unwrap();
        published.push((subject.to_string(), payload.clone()));
        Ok(format!("msg-{}", published.len()))
    }
}
