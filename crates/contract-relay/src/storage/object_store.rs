use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use crate::error::StorageError;
use crate::extraction::DocumentSource;

/// Result of a successful object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// `s3://{bucket}/{key}`
    pub uri: String,
    pub content_type: String,
    pub size: usize,
}

/// Durable object storage. Writes to the same key overwrite.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>)
        -> Result<StoredObject, StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Object store backed by a directory per bucket under `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `(bucket, key)` to a path, refusing anything that would escape the
    /// bucket directory.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_segment(bucket, "bucket")?;
        if key.is_empty() || key.contains('\\') {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "key must be a non-empty relative path".to_string(),
            });
        }
        let relative = Path::new(key);
        // `components()` silently drops inner "." segments, so check the raw key too
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            && key.split('/').all(|s| !s.is_empty() && s != "." && s != "..");
        if !clean {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "key must not be absolute or contain '.' or '..' segments".to_string(),
            });
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

pub(crate) fn validate_segment(value: &str, what: &str) -> Result<(), StorageError> {
    if value.is_empty() || value.contains('/') || value.contains('\\') || value.starts_with('.') {
        return Err(StorageError::InvalidKey {
            key: value.to_string(),
            reason: format!("{} must be a single path segment", what),
        });
    }
    Ok(())
}

/// Writes `bytes` to a sibling temp file and renames it over `path` so readers
/// never see a partial object.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    tokio::fs::write(&temp_path, bytes)
        .await
        .map_err(|e| StorageError::WriteFile {
            path: temp_path.clone(),
            source: e,
        })?;

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        });
    }

    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, StorageError> {
        let path = self.object_path(bucket, key)?;
        write_atomic(&path, &bytes).await?;

        let stored = StoredObject {
            uri: object_uri(bucket, key),
            content_type: content_type_for(key),
            size: bytes.len(),
        };
        debug!(
            "Stored {} ({} bytes, {})",
            stored.uri, stored.size, stored.content_type
        );
        Ok(stored)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }
}

#[async_trait]
impl DocumentSource for FsObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(bucket, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path());

        let stored = store
            .put("evidence", "contracts/c1/unit_1/buyerName.png", b"png".to_vec())
            .await
            .unwrap();
        assert_eq!(stored.uri, "s3://evidence/contracts/c1/unit_1/buyerName.png");
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.size, 3);

        let bytes = store
            .get("evidence", "contracts/c1/unit_1/buyerName.png")
            .await
            .unwrap();
        assert_eq!(bytes, b"png");
    }

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path());
        store.put("b", "k.png", b"one".to_vec()).await.unwrap();
        store.put("b", "k.png", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("b", "k.png").await.unwrap(), b"two");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("b"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let result = store.fetch("b", "contracts/missing.pdf").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn test_object_path_rejects_escapes() {
        let store = FsObjectStore::new("/srv/buckets");
        assert!(store.object_path("b", "../secret").is_err());
        assert!(store.object_path("b", "/etc/passwd").is_err());
        assert!(store.object_path("b", "a/./b").is_err());
        assert!(store.object_path("../b", "k").is_err());
        assert!(store.object_path("b", "").is_err());
        assert_eq!(
            store.object_path("b", "contracts/c1.pdf").unwrap(),
            PathBuf::from("/srv/buckets/b/contracts/c1.pdf")
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.json"), "application/json");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
