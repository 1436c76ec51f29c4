use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::CredentialSource;

/// Deployment-time worker configuration. Loaded once, never per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Destination bucket for evidence objects and the bucket documents are read from.
    #[serde(default)]
    pub bucket_name: String,
    /// Root directory backing the object store (one sub-directory per bucket).
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Where local durable payload copies and delivery records are written.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn state_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("contract-relay")
}

fn default_storage_root() -> PathBuf {
    state_directory().join("buckets")
}

fn default_output_directory() -> PathBuf {
    state_directory().join("output")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            storage_root: default_storage_root(),
            output_directory: default_output_directory(),
            worker_count: default_worker_count(),
            queue: QueueConfig::default(),
            extraction: ExtractionConfig::default(),
            notification: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a received message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Deliveries allowed before the message is moved to the dead-letter path.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// Hard limit for one processing attempt.
    #[serde(default = "default_invocation_timeout")]
    pub invocation_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Inbox files modified more recently than this are left for a later scan.
    #[serde(default = "default_inbox_settle")]
    pub inbox_settle_ms: u64,
    /// Directory the worker binary feeds the queue from.
    #[serde(default = "default_inbox_directory")]
    pub inbox_directory: PathBuf,
    #[serde(default)]
    pub dead_letter_directory: Option<PathBuf>,
}

fn default_visibility_timeout() -> u64 {
    960
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_dedup_window() -> u64 {
    300
}

fn default_invocation_timeout() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    500
}

fn default_inbox_settle() -> u64 {
    500
}

fn default_inbox_directory() -> PathBuf {
    state_directory().join("inbox")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            dedup_window_secs: default_dedup_window(),
            invocation_timeout_secs: default_invocation_timeout(),
            poll_interval_ms: default_poll_interval(),
            inbox_settle_ms: default_inbox_settle(),
            inbox_directory: default_inbox_directory(),
            dead_letter_directory: None,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inbox_settle_time(&self) -> Duration {
        Duration::from_millis(self.inbox_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Base URL of the extraction service; each pass posts to `{endpoint}/{pass}`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Passes run in order and merged by unit index.
    #[serde(default = "default_passes")]
    pub passes: Vec<String>,
    /// URL of the evidence rendering service.
    #[serde(default)]
    pub render_endpoint: Option<String>,
    #[serde(default = "default_evidence_concurrency")]
    pub evidence_concurrency: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_credential")]
    pub credential: CredentialSource,
}

fn default_passes() -> Vec<String> {
    vec![
        "contract_information".to_string(),
        "installment_series".to_string(),
    ]
}

fn default_evidence_concurrency() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    300
}

fn default_credential() -> CredentialSource {
    CredentialSource::from_env_var("RELAY_MODEL_API_KEY")
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            passes: default_passes(),
            render_endpoint: None,
            evidence_concurrency: default_evidence_concurrency(),
            request_timeout_secs: default_request_timeout(),
            credential: default_credential(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Destination channel. Absent means delivery is skipped.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retries are never scheduled past this window after the first attempt.
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_window() -> u64 {
    6 * 60 * 60
}

fn default_initial_backoff() -> u64 {
    30 * 60
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_attempts: default_max_attempts(),
            window_secs: default_window(),
            initial_backoff_secs: default_initial_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_contract() {
        let config = WorkerConfig::default();
        assert!(config.bucket_name.is_empty());
        assert!(config.worker_count >= 1);
        assert_eq!(config.queue.max_receive_count, 3);
        assert!(config.queue.visibility_timeout() > config.queue.invocation_timeout());
        assert_eq!(config.notification.max_attempts, 2);
        assert_eq!(config.notification.window_secs, 21_600);
        assert!(config.notification.url.is_none());
        assert_eq!(config.extraction.passes.len(), 2);
    }

    #[test]
    fn test_log_format_deserializes_lowercase() {
        let logging: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.filter, "info");
    }
}
