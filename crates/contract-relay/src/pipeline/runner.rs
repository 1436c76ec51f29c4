use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::{ConfigError, ExtractionError, RelayError, StorageError};
use crate::extraction::{
    DocumentSource, EvidenceRenderer, ExtractionOrchestrator, ExtractionPass,
    HttpEvidenceRenderer, HttpExtractionPass, SourceRegion,
};
use crate::notification::{
    assemble, assemble_error, degrade_confidence, render_units_report, spawn_retries,
    DeliveryRecord, DeliveryRouter, DeliveryState, NotificationChannel, NotificationPayload,
    PayloadStatus, PayloadStore, RetryPolicy, WebhookChannel,
};
use crate::queue::JobDescriptor;
use crate::sanitize;
use crate::secrets::SecretError;
use crate::storage::{evidence_manifest, EvidenceCapture, EvidenceOutcome, FsObjectStore};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub job_id: String,
    pub status: PayloadStatus,
    pub unit_count: usize,
    pub payload_path: PathBuf,
    pub delivery: DeliveryState,
    pub warnings: Vec<PipelineWarning>,
}

/// Used when no render endpoint is configured: every field ends up without
/// evidence and with capped confidence.
struct UnavailableRenderer;

#[async_trait]
impl EvidenceRenderer for UnavailableRenderer {
    async fn render(
        &self,
        _document: &[u8],
        _region: &SourceRegion,
    ) -> Result<Vec<u8>, ExtractionError> {
        Err(ExtractionError::Render(
            "no render endpoint configured".to_string(),
        ))
    }
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    documents: Arc<dyn DocumentSource>,
    orchestrator: ExtractionOrchestrator,
    evidence: EvidenceCapture,
    store: Arc<PayloadStore>,
    router: Arc<DeliveryRouter>,
}

impl Pipeline {
    /// Production constructor. Builds every collaborator from the worker
    /// configuration and resolves the model credential once.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, RelayError> {
        let pipeline_config = Arc::new(PipelineConfig::from_config(config));
        let extraction = &config.extraction;

        let endpoint = extraction
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ConfigError::Validation {
                message: "extraction.endpoint is required".to_string(),
            })?;

        let credential = match extraction.credential.resolve() {
            Ok(credential) => credential,
            Err(SecretError::EnvVarNotSet { name }) => {
                warn!("Model credential variable {} is not set; calling services without credentials", name);
                None
            }
            Err(e) => return Err(ConfigError::from(e).into()),
        };

        let request_timeout = Duration::from_secs(extraction.request_timeout_secs);
        let mut passes: Vec<Arc<dyn ExtractionPass>> = Vec::with_capacity(extraction.passes.len());
        for pass in &extraction.passes {
            passes.push(Arc::new(HttpExtractionPass::new(
                endpoint,
                pass,
                credential.clone(),
                request_timeout,
            )?));
        }

        let renderer: Arc<dyn EvidenceRenderer> = match extraction.render_endpoint.as_deref() {
            Some(url) if !url.trim().is_empty() => Arc::new(HttpEvidenceRenderer::new(
                url,
                credential.clone(),
                request_timeout,
            )?),
            _ => {
                warn!("No render endpoint configured; evidence capture is disabled");
                Arc::new(UnavailableRenderer)
            }
        };

        let objects = Arc::new(FsObjectStore::new(&config.storage_root));
        let evidence = EvidenceCapture::new(
            renderer,
            objects.clone(),
            &config.bucket_name,
            extraction.evidence_concurrency,
        );

        let channel: Option<Arc<dyn NotificationChannel>> = match config.notification.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Some(Arc::new(WebhookChannel::new(url)?)),
            _ => None,
        };
        let router = DeliveryRouter::new(channel, RetryPolicy::from_config(&config.notification));

        Ok(Self {
            store: Arc::new(PayloadStore::new(&pipeline_config.output_directory)),
            config: pipeline_config,
            documents: objects,
            orchestrator: ExtractionOrchestrator::new(passes),
            evidence,
            router: Arc::new(router),
        })
    }

    /// Constructor with injected collaborators.
    pub fn new(
        config: Arc<PipelineConfig>,
        documents: Arc<dyn DocumentSource>,
        orchestrator: ExtractionOrchestrator,
        evidence: EvidenceCapture,
        store: Arc<PayloadStore>,
        router: Arc<DeliveryRouter>,
    ) -> Self {
        Self {
            config,
            documents,
            orchestrator,
            evidence,
            store,
            router,
        }
    }

    pub fn store(&self) -> &Arc<PayloadStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<DeliveryRouter> {
        &self.router
    }

    /// Run the full pipeline for a single job.
    pub async fn run(&self, job: JobDescriptor) -> Result<PipelineOutcome, PipelineError> {
        let (result, _ctx) = self.run_with_context(PipelineContext::new(job)).await;
        result
    }

    /// Records a run that was cut off by the invocation timeout the same way
    /// as any other job failure: error payload persisted, published only on
    /// the last receive.
    pub async fn record_timeout(&self, job: JobDescriptor, timeout: Duration) -> PipelineError {
        let span = info_span!("pipeline",
            job_id = %job.job_id,
            file = %sanitize::redact_key(&job.file_key),
            receive_count = job.receive_count,
        );
        let mut ctx = PipelineContext::new(job);
        self.fail(&mut ctx, PipelineError::TimedOut(timeout))
            .instrument(span)
            .await
    }

    /// Like [`Pipeline::run`], also handing back the context with every
    /// intermediate result.
    pub async fn run_with_context(
        &self,
        mut ctx: PipelineContext,
    ) -> (Result<PipelineOutcome, PipelineError>, PipelineContext) {
        let span = info_span!("pipeline",
            job_id = %ctx.job.job_id,
            file = %sanitize::redact_key(&ctx.job.file_key),
            receive_count = ctx.job.receive_count,
        );
        let result = self.run_steps(&mut ctx).instrument(span).await;
        (result, ctx)
    }

    async fn run_steps(&self, ctx: &mut PipelineContext) -> Result<PipelineOutcome, PipelineError> {
        // Step 1: Fetch the source document
        let document = match self
            .documents
            .fetch(&self.config.bucket_name, &ctx.job.file_key)
            .instrument(info_span!("fetch_document"))
            .await
        {
            Ok(document) => document,
            Err(e) => return Err(self.fail(ctx, PipelineError::Fetch(e)).await),
        };
        debug!("Fetched document ({} bytes)", document.len());
        ctx.document_size = Some(document.len());

        // Step 2: Extract units
        let extraction = match self
            .orchestrator
            .extract(&ctx.job.job_id, &document)
            .instrument(info_span!("extract"))
            .await
        {
            Ok(extraction) => extraction,
            Err(e) => return Err(self.fail(ctx, PipelineError::Extraction(e)).await),
        };
        ctx.warnings
            .extend(extraction.dropped_sources.iter().map(|d| PipelineWarning::DroppedSource {
                unit_index: d.unit_index,
                field: d.field.clone(),
            }));
        for result in &extraction.pass_results {
            let written = self.store.write_pass_result(&ctx.job.job_id, result).await;
            record_artifact(ctx, &format!("{} result", result.pass), written);
        }
        let extraction = ctx.extraction.insert(extraction);

        // Step 3: Capture evidence
        let evidence = self
            .evidence
            .capture(&ctx.job.job_id, &document, &extraction.units)
            .instrument(info_span!("capture_evidence"))
            .await;
        for item in evidence.iter().flatten() {
            let reason = match &item.outcome {
                EvidenceOutcome::Stored { .. } => continue,
                EvidenceOutcome::NoRegion => "no source region reported".to_string(),
                EvidenceOutcome::UnsafeField => "field name is not key-safe".to_string(),
                EvidenceOutcome::Failed { error } => error.clone(),
            };
            ctx.warnings.push(PipelineWarning::EvidenceUnavailable {
                unit_index: item.unit_index,
                field: item.field.clone(),
                reason,
            });
        }
        let written = self
            .store
            .write_manifest(&ctx.job.job_id, &evidence_manifest(&evidence))
            .await;
        record_artifact(ctx, "evidence manifest", written);
        ctx.evidence = evidence;
        let evidence = &ctx.evidence;
        let extraction = ctx.extraction.as_ref().expect("extraction stored above");

        // Step 4: Assemble and persist
        let payload = {
            let _step = info_span!("assemble").entered();
            let units: Vec<_> = extraction.units.iter().map(|e| e.unit.clone()).collect();
            let sources: Vec<Vec<_>> = evidence
                .iter()
                .map(|items| items.iter().map(|e| e.to_reference()).collect())
                .collect();
            let confidences: Vec<_> = units
                .iter()
                .zip(evidence.iter())
                .map(|(unit, items)| degrade_confidence(&unit.confidence, items))
                .collect();
            assemble(
                &ctx.job.job_id,
                &self.config.bucket_name,
                &units,
                &sources,
                &confidences,
                PayloadStatus::Success,
            )
        };

        let payload_path = self
            .store
            .persist(&payload)
            .await
            .map_err(PipelineError::Persist)?;
        info!(
            units = payload.units.len(),
            path = %payload_path.display(),
            "Payload persisted"
        );

        let written = self
            .store
            .write_report(&ctx.job.job_id, &render_units_report(&payload))
            .await;
        record_artifact(ctx, "units report", written);

        // Step 5: Route delivery
        let record = self.deliver(ctx, &payload).instrument(info_span!("deliver")).await;

        let outcome = PipelineOutcome {
            job_id: ctx.job.job_id.clone(),
            status: payload.status,
            unit_count: payload.units.len(),
            payload_path: payload_path.clone(),
            delivery: record.state,
            warnings: ctx.warnings.clone(),
        };

        ctx.payload = Some(payload);
        ctx.payload_path = Some(payload_path);
        ctx.delivery = Some(record);

        Ok(outcome)
    }

    /// Runs the first delivery attempt inline. Remaining retries continue in
    /// the background so the message can be acknowledged.
    async fn deliver(&self, ctx: &mut PipelineContext, payload: &NotificationPayload) -> DeliveryRecord {
        let mut record = self.router.begin(payload);
        self.router.step(&mut record, payload).await;

        if let Err(e) = self.store.write_delivery(&record).await {
            warn!("Failed to write delivery record: {}", e);
            ctx.warnings.push(PipelineWarning::DeliveryRecordNotWritten {
                error: e.to_string(),
            });
        }

        if record.state == DeliveryState::RetryScheduled {
            spawn_retries(
                Arc::clone(&self.router),
                Arc::clone(&self.store),
                record.clone(),
                payload.clone(),
            );
        }

        record
    }

    /// Persists an error payload for a failed attempt and publishes it only
    /// on the last receive. Hands `err` back unchanged.
    async fn fail(&self, ctx: &mut PipelineContext, err: PipelineError) -> PipelineError {
        error!("Job failed: {}", err);

        let payload = assemble_error(&ctx.job.job_id, &self.config.bucket_name);
        match self.store.persist(&payload).await {
            Ok(path) => ctx.payload_path = Some(path),
            Err(e) => error!("Failed to persist error payload: {}", e),
        }

        if ctx.job.receive_count >= self.config.max_receive_count {
            info!("Final attempt; publishing error notification");
            let record = self.deliver(ctx, &payload).instrument(info_span!("deliver")).await;
            ctx.delivery = Some(record);
        } else {
            debug!(
                "Error notification held back (receive {} of {})",
                ctx.job.receive_count, self.config.max_receive_count
            );
        }

        ctx.payload = Some(payload);
        err
    }
}

/// Side artifacts are best effort: a failed write becomes a warning.
fn record_artifact(ctx: &mut PipelineContext, artifact: &str, written: Result<PathBuf, StorageError>) {
    match written {
        Ok(path) => debug!("Wrote {} to {}", artifact, path.display()),
        Err(e) => {
            warn!("Failed to write {}: {}", artifact, e);
            ctx.warnings.push(PipelineWarning::ArtifactNotWritten {
                artifact: artifact.to_string(),
                error: e.to_string(),
            });
        }
    }
}
