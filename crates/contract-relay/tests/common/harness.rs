//! Test harness for isolated pipeline and consumer runs.
//!
//! `TestHarness` owns a temp directory holding the object store root, the
//! payload output directory and the dead-letter directory, and wires a
//! `Pipeline` from fake collaborators.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use contract_relay::extraction::{EvidenceRenderer, ExtractionPass};
use contract_relay::notification::{
    DeliveryRouter, NotificationChannel, PayloadStore, RetryPolicy,
};
use contract_relay::storage::{EvidenceCapture, FsObjectStore};
use contract_relay::{
    ExtractionOrchestrator, JobQueue, LocalQueue, MessageConsumer, Pipeline, PipelineConfig,
    QueueSettings,
};

use super::builders::{PngRenderer, RecordingChannel, PDF_BYTES};

pub const BUCKET: &str = "contracts-test";

/// Knobs for [`TestHarness::pipeline_with`].
pub struct PipelineOptions {
    pub renderer: Arc<dyn EvidenceRenderer>,
    /// When false no notification channel is configured.
    pub with_channel: bool,
    pub max_receive_count: u32,
    pub retry_policy: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            renderer: PngRenderer::working(),
            with_channel: true,
            max_receive_count: 3,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                window: Duration::from_secs(60),
                initial_backoff: Duration::ZERO,
            },
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub storage_root: PathBuf,
    pub output_dir: PathBuf,
    pub dead_letter_dir: PathBuf,
    pub bucket: String,
    pub channel: Arc<RecordingChannel>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_channel(RecordingChannel::new())
    }

    pub fn with_channel(channel: Arc<RecordingChannel>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage_root = temp_dir.path().join("objects");
        let output_dir = temp_dir.path().join("output");
        let dead_letter_dir = temp_dir.path().join("dead-letter");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage root");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            storage_root,
            output_dir,
            dead_letter_dir,
            bucket: BUCKET.to_string(),
            channel,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Places a source document where the pipeline will fetch it.
    pub fn put_document(&self, key: &str) {
        let path = self.storage_root.join(&self.bucket).join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, PDF_BYTES).unwrap();
    }

    pub fn evidence_path(&self, job_id: &str, unit_index: usize, field: &str) -> PathBuf {
        self.storage_root
            .join(&self.bucket)
            .join(format!("contracts/{}/unit_{}/{}.png", job_id, unit_index, field))
    }

    pub fn payload_store(&self) -> Arc<PayloadStore> {
        Arc::new(PayloadStore::new(&self.output_dir))
    }

    pub fn pipeline(&self, passes: Vec<Arc<dyn ExtractionPass>>) -> Pipeline {
        self.pipeline_with(passes, PipelineOptions::default())
    }

    pub fn pipeline_with(
        &self,
        passes: Vec<Arc<dyn ExtractionPass>>,
        options: PipelineOptions,
    ) -> Pipeline {
        let config = Arc::new(PipelineConfig {
            bucket_name: self.bucket.clone(),
            output_directory: self.output_dir.clone(),
            max_receive_count: options.max_receive_count,
        });
        let objects = Arc::new(FsObjectStore::new(&self.storage_root));
        let evidence = EvidenceCapture::new(options.renderer, objects.clone(), &self.bucket, 2);
        let channel: Option<Arc<dyn NotificationChannel>> = if options.with_channel {
            Some(self.channel.clone() as Arc<dyn NotificationChannel>)
        } else {
            None
        };
        let router = Arc::new(DeliveryRouter::new(channel, options.retry_policy));

        Pipeline::new(
            config,
            objects,
            ExtractionOrchestrator::new(passes),
            evidence,
            self.payload_store(),
            router,
        )
    }

    /// Queue with an immediate visibility timeout so released messages are
    /// redelivered on the next receive.
    pub fn queue(&self, max_receive_count: u32) -> Arc<LocalQueue> {
        self.queue_with_visibility(max_receive_count, Duration::ZERO)
    }

    /// Queue for concurrent consumers: in-flight messages stay hidden.
    pub fn queue_with_visibility(
        &self,
        max_receive_count: u32,
        visibility_timeout: Duration,
    ) -> Arc<LocalQueue> {
        Arc::new(LocalQueue::new(QueueSettings {
            visibility_timeout,
            max_receive_count,
            dedup_window: Duration::from_secs(300),
            dead_letter_directory: Some(self.dead_letter_dir.clone()),
        }))
    }

    pub fn consumer(
        &self,
        queue: Arc<LocalQueue>,
        pipeline: Pipeline,
        invocation_timeout: Duration,
    ) -> MessageConsumer {
        let queue: Arc<dyn JobQueue> = queue;
        MessageConsumer::new(queue, Arc::new(pipeline), invocation_timeout)
    }
}
