use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve model credential: {0}")]
    Credential(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Unknown or expired receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Queue lock poisoned")]
    Poisoned,

    #[error("Failed to persist dead-letter record '{path}': {source}")]
    DeadLetterWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Permanent message-shape failures. Never worth a retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message body is not a JSON object: {0}")]
    MalformedBody(String),

    #[error("Required field '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("Field '{field}' has an unusable value: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },

    #[error("Extraction pass '{pass}' returned an unreadable response: {message}")]
    InvalidResponse { pass: String, message: String },

    #[error("Evidence rendering failed: {0}")]
    Render(String),

    #[error("No extraction passes configured")]
    NoPasses,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Failed to serialize '{path}': {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Notification channel unreachable: {0}")]
    Unreachable(String),

    #[error("Notification channel rejected the payload with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to encode notification payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Whether another attempt with the same payload may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Unreachable(_) => true,
            DeliveryError::Rejected { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            DeliveryError::Encode(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Inbox scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Inbox error: {0}")]
    Inbox(String),

    #[error("Inbox watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
