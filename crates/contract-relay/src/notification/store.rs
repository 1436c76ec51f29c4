use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::extraction::PassResult;
use crate::storage::object_store::{validate_segment, write_atomic};

use super::payload::NotificationPayload;
use super::router::{DeliveryRecord, DeliveryState};

pub const PAYLOAD_FILE_NAME: &str = "notification_payload.json";
pub const DELIVERY_FILE_NAME: &str = "delivery.json";
pub const MANIFEST_FILE_NAME: &str = "cutout_manifest.json";
pub const REPORT_FILE_NAME: &str = "report.md";
const PASS_RESULT_SUFFIX: &str = "_extraction_result.json";

/// Local durable copies of payloads and delivery outcomes, one directory per job.
pub struct PayloadStore {
    output_directory: PathBuf,
}

impl PayloadStore {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn job_directory(&self, job_id: &str) -> PathBuf {
        self.output_directory.join(job_id)
    }

    pub fn payload_path(&self, job_id: &str) -> PathBuf {
        self.job_directory(job_id).join(PAYLOAD_FILE_NAME)
    }

    pub fn delivery_path(&self, job_id: &str) -> PathBuf {
        self.job_directory(job_id).join(DELIVERY_FILE_NAME)
    }

    pub fn manifest_path(&self, job_id: &str) -> PathBuf {
        self.job_directory(job_id).join(MANIFEST_FILE_NAME)
    }

    pub fn report_path(&self, job_id: &str) -> PathBuf {
        self.job_directory(job_id).join(REPORT_FILE_NAME)
    }

    /// `{job}/{pass}_extraction_result.json`. Pass names must be a single
    /// path segment.
    pub fn pass_result_path(&self, job_id: &str, pass: &str) -> Result<PathBuf, StorageError> {
        validate_segment(pass, "pass name")?;
        Ok(self
            .job_directory(job_id)
            .join(format!("{}{}", pass, PASS_RESULT_SUFFIX)))
    }

    /// Writes one pass's raw units.
    pub async fn write_pass_result(
        &self,
        job_id: &str,
        result: &PassResult,
    ) -> Result<PathBuf, StorageError> {
        let path = self.pass_result_path(job_id, &result.pass)?;
        write_json(&path, &result.units).await?;
        Ok(path)
    }

    /// Writes the evidence manifest, `unit{n}_{field}` to stored object URIs.
    pub async fn write_manifest(
        &self,
        job_id: &str,
        manifest: &IndexMap<String, Vec<String>>,
    ) -> Result<PathBuf, StorageError> {
        let path = self.manifest_path(job_id);
        write_json(&path, manifest).await?;
        Ok(path)
    }

    pub async fn load_manifest(&self, job_id: &str) -> Result<IndexMap<String, Vec<String>>, StorageError> {
        read_json(&self.manifest_path(job_id)).await
    }

    pub async fn write_report(&self, job_id: &str, markdown: &str) -> Result<PathBuf, StorageError> {
        let path = self.report_path(job_id);
        write_atomic(&path, markdown.as_bytes()).await?;
        Ok(path)
    }

    /// Writes the payload copy, replacing any earlier attempt's copy.
    pub async fn persist(&self, payload: &NotificationPayload) -> Result<PathBuf, StorageError> {
        let path = self.payload_path(&payload.job_id);
        write_json(&path, payload).await?;
        debug!("Persisted payload for job {} to {}", payload.job_id, path.display());
        Ok(path)
    }

    pub async fn load_payload(&self, job_id: &str) -> Result<NotificationPayload, StorageError> {
        read_json(&self.payload_path(job_id)).await
    }

    pub async fn write_delivery(&self, record: &DeliveryRecord) -> Result<PathBuf, StorageError> {
        let path = self.delivery_path(&record.job_id);
        write_json(&path, record).await?;
        Ok(path)
    }

    pub async fn load_delivery(&self, job_id: &str) -> Result<DeliveryRecord, StorageError> {
        read_json(&self.delivery_path(job_id)).await
    }

    /// Delivery records still waiting for a retry. Unreadable records are
    /// skipped with a warning.
    pub fn pending_deliveries(&self) -> Vec<DeliveryRecord> {
        if !self.output_directory.is_dir() {
            return Vec::new();
        }

        let mut pending = Vec::new();
        for entry in WalkDir::new(&self.output_directory)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name() != DELIVERY_FILE_NAME {
                continue;
            }
            let record = std::fs::read(entry.path())
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<DeliveryRecord>(&bytes).map_err(|e| e.to_string())
                });
            match record {
                Ok(record) if record.state == DeliveryState::RetryScheduled => pending.push(record),
                Ok(_) => {}
                Err(e) => warn!(
                    "Skipping unreadable delivery record {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        pending
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_atomic(path, &bytes).await
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::assembler::assemble_error;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(job_id: &str, state: DeliveryState) -> DeliveryRecord {
        DeliveryRecord {
            job_id: job_id.to_string(),
            state,
            attempts: 1,
            first_attempt_at: Some(Utc::now()),
            next_attempt_at: None,
            last_error: None,
            message_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_paths_are_pure_functions_of_job_id() {
        let store = PayloadStore::new("/srv/output");
        assert_eq!(
            store.payload_path("c1"),
            PathBuf::from("/srv/output/c1/notification_payload.json")
        );
        assert_eq!(store.payload_path("c1"), store.payload_path("c1"));
        assert_eq!(
            store.delivery_path("c1"),
            PathBuf::from("/srv/output/c1/delivery.json")
        );
    }

    #[tokio::test]
    async fn test_persist_overwrites_previous_attempt() {
        let tmp = TempDir::new().unwrap();
        let store = PayloadStore::new(tmp.path());

        let first = assemble_error("c1", "b");
        store.persist(&first).await.unwrap();
        let second = assemble_error("c1", "b");
        let path = store.persist(&second).await.unwrap();

        assert_eq!(path, store.payload_path("c1"));
        let loaded = store.load_payload("c1").await.unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn test_pending_deliveries_only_lists_scheduled_retries() {
        let tmp = TempDir::new().unwrap();
        let store = PayloadStore::new(tmp.path());
        store
            .write_delivery(&record("c1", DeliveryState::RetryScheduled))
            .await
            .unwrap();
        store
            .write_delivery(&record("c2", DeliveryState::Delivered))
            .await
            .unwrap();
        std::fs::create_dir_all(tmp.path().join("c3")).unwrap();
        std::fs::write(tmp.path().join("c3").join(DELIVERY_FILE_NAME), b"{oops").unwrap();

        let pending = store.pending_deliveries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, "c1");
    }

    #[test]
    fn test_pass_result_path_rejects_unsafe_names() {
        let store = PayloadStore::new("/srv/output");
        assert_eq!(
            store.pass_result_path("c1", "contract_information").unwrap(),
            PathBuf::from("/srv/output/c1/contract_information_extraction_result.json")
        );
        assert!(store.pass_result_path("c1", "../escape").is_err());
        assert!(store.pass_result_path("c1", "a/b").is_err());
    }

    #[tokio::test]
    async fn test_manifest_round_trip_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let store = PayloadStore::new(tmp.path());
        let mut manifest = IndexMap::new();
        manifest.insert("unit1_sellValue".to_string(), vec!["s3://b/k2.png".to_string()]);
        manifest.insert("unit1_buyerName".to_string(), vec!["s3://b/k1.png".to_string()]);

        store.write_manifest("c1", &manifest).await.unwrap();
        let loaded = store.load_manifest("c1").await.unwrap();
        let keys: Vec<_> = loaded.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["unit1_sellValue", "unit1_buyerName"]);
    }

    #[test]
    fn test_pending_deliveries_missing_directory() {
        let store = PayloadStore::new("/nonexistent/relay/output");
        assert!(store.pending_deliveries().is_empty());
    }
}
