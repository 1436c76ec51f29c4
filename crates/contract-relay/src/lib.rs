pub mod config;
pub mod error;
pub mod extraction;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use config::{load_config, load_config_from_env, LogFormat, WorkerConfig};
pub use error::{
    ConfigError, DeliveryError, ExtractionError, QueueError, RelayError, Result, StorageError,
    ValidationError, WorkerError,
};
pub use extraction::{Confidence, ExtractionOrchestrator, ExtractionUnit, SourceReference};
pub use notification::{DeliveryRouter, DeliveryState, NotificationPayload, PayloadStatus};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineOutcome};
pub use queue::{JobDescriptor, JobQueue, LocalQueue, QueueSettings};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use worker::{InboxScanner, JobOutcome, JobResult, MessageConsumer, WorkerPool};
