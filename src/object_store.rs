//! Object store gateway used for every persisted artifact.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

const BUCKET_META_FILE: &str = ".bucket.json";
const VERSIONS_DIR: &str = ".versions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("bucket metadata for '{bucket}' is unreadable: {message}")]
    CorruptBucketMeta { bucket: String, message: String },
}

/// Blob storage addressed by `(bucket, key)`.
///
/// `get` returns `Ok(false)` when the object does not exist; `Err` is reserved
/// for real failures so callers can tell a bootstrap from an outage.
pub trait ObjectStore {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;
    fn get(&self, bucket: &str, key: &str, local_path: &Path) -> Result<bool, StorageError>;
    /// Uploads `local_path`, creating the bucket first when absent.
    fn put(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), StorageError>;
    fn enable_versioning(&self, bucket: &str) -> Result<(), StorageError>;
    fn versioning_status(&self, bucket: &str) -> Result<Option<VersioningStatus>, StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketMeta {
    versioning: Option<VersioningStatus>,
}

/// Filesystem-backed store: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archived prior versions of `key`, oldest first.
    pub fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.bucket_dir(bucket)?.join(VERSIONS_DIR).join(checked_key(key)?);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            versions.push(entry.file_name().to_string_lossy().to_string());
        }
        versions.sort();
        Ok(versions)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let valid = !bucket.is_empty()
            && bucket != "."
            && bucket != ".."
            && bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidBucket(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.bucket_dir(bucket)?.join(checked_key(key)?))
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.exists() {
            info!(
                component = "object_store",
                event = "storage.bucket.create",
                bucket
            );
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    fn read_meta(&self, bucket: &str) -> Result<Option<BucketMeta>, StorageError> {
        let path = self.bucket_dir(bucket)?.join(BUCKET_META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StorageError::CorruptBucketMeta {
                bucket: bucket.to_string(),
                message: err.to_string(),
            })
    }

    fn archive_current(&self, bucket: &str, key: &str, current: &Path) -> Result<(), StorageError> {
        let bytes = fs::read(current)?;
        let version_id = version_id(&bytes);
        let dest = self
            .bucket_dir(bucket)?
            .join(VERSIONS_DIR)
            .join(checked_key(key)?)
            .join(&version_id);
        write_atomic(&dest, &bytes)?;
        debug!(
            component = "object_store",
            event = "storage.version.archived",
            bucket,
            key,
            version_id = %version_id
        );
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.object_path(bucket, key)?.is_file())
    }

    fn get(&self, bucket: &str, key: &str, local_path: &Path) -> Result<bool, StorageError> {
        let source = self.object_path(bucket, key)?;
        if !source.is_file() {
            info!(
                component = "object_store",
                event = "storage.get.missing",
                bucket,
                key
            );
            return Ok(false);
        }

        let bytes = fs::read(&source)?;
        write_atomic(local_path, &bytes)?;
        info!(
            component = "object_store",
            event = "storage.get",
            bucket,
            key,
            local_path = %local_path.display(),
            bytes = bytes.len()
        );
        Ok(true)
    }

    fn put(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), StorageError> {
        let dest = self.object_path(bucket, key)?;
        let bytes = fs::read(local_path)?;
        self.ensure_bucket(bucket)?;

        let versioned = matches!(
            self.versioning_status(bucket)?,
            Some(VersioningStatus::Enabled)
        );
        if versioned && dest.is_file() {
            self.archive_current(bucket, key, &dest)?;
        }

        write_atomic(&dest, &bytes)?;
        info!(
            component = "object_store",
            event = "storage.put",
            bucket,
            key,
            bytes = bytes.len(),
            versioned
        );
        Ok(())
    }

    fn enable_versioning(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.ensure_bucket(bucket)?;
        let mut meta = self.read_meta(bucket)?.unwrap_or_default();
        meta.versioning = Some(VersioningStatus::Enabled);
        let payload = serde_json::to_vec_pretty(&meta).map_err(|err| {
            StorageError::CorruptBucketMeta {
                bucket: bucket.to_string(),
                message: err.to_string(),
            }
        })?;
        write_atomic(&dir.join(BUCKET_META_FILE), &payload)?;
        info!(
            component = "object_store",
            event = "storage.versioning.enabled",
            bucket
        );
        Ok(())
    }

    fn versioning_status(&self, bucket: &str) -> Result<Option<VersioningStatus>, StorageError> {
        Ok(self.read_meta(bucket)?.and_then(|meta| meta.versioning))
    }
}

fn checked_key(key: &str) -> Result<PathBuf, StorageError> {
    let path = Path::new(key);
    // Reserved names would collide with bucket bookkeeping.
    let valid = !key.is_empty()
        && path.components().all(|component| match component {
            Component::Normal(name) => name != VERSIONS_DIR && name != BUCKET_META_FILE,
            _ => false,
        });
    if !valid {
        warn!(
            component = "object_store",
            event = "storage.key.rejected",
            key
        );
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(path.to_path_buf())
}

fn version_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%6fZ"),
        &digest[..16]
    )
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            )
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn get_reports_missing_object_without_error() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path().join("store"));
        let local = temp.path().join("out.csv");

        assert!(!store.exists("bucket", "nothing.csv").unwrap());
        assert!(!store.get("bucket", "nothing.csv", &local).unwrap());
        assert!(!local.exists());
    }

    #[test]
    fn put_creates_bucket_and_get_roundtrips_bytes() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path().join("store"));
        let src = temp.path().join("src.csv");
        fs::write(&src, b"a,b\n1,2\n").unwrap();

        store.put(&src, "fresh-bucket", "nested/data.csv").unwrap();
        assert!(store.exists("fresh-bucket", "nested/data.csv").unwrap());

        let dest = temp.path().join("download").join("data.csv");
        assert!(store.get("fresh-bucket", "nested/data.csv", &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn put_from_missing_local_file_fails_and_keeps_previous_object() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path());
        let src = temp.path().join("src.csv");
        fs::write(&src, b"v1").unwrap();
        store.put(&src, "b", "k.csv").unwrap();

        let err = store
            .put(&temp.path().join("absent.csv"), "b", "k.csv")
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let dest = temp.path().join("check.csv");
        assert!(store.get("b", "k.csv", &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"v1");
    }

    #[test]
    fn rejects_escaping_keys_and_bad_bucket_names() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path());
        let local = temp.path().join("x");

        assert!(matches!(
            store.get("b", "../escape.csv", &local).unwrap_err(),
            StorageError::InvalidKey(_)
        ));
        assert!(matches!(
            store.get("b", "/abs.csv", &local).unwrap_err(),
            StorageError::InvalidKey(_)
        ));
        assert!(matches!(
            store.exists("b", "").unwrap_err(),
            StorageError::InvalidKey(_)
        ));
        assert!(matches!(
            store.exists("bad/bucket", "k").unwrap_err(),
            StorageError::InvalidBucket(_)
        ));
    }

    #[test]
    fn versioning_archives_previous_content_on_overwrite() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path().join("store"));
        let src = temp.path().join("src.csv");

        assert_eq!(store.versioning_status("b").unwrap(), None);
        store.enable_versioning("b").unwrap();
        assert_eq!(
            store.versioning_status("b").unwrap(),
            Some(VersioningStatus::Enabled)
        );

        fs::write(&src, b"first").unwrap();
        store.put(&src, "b", "data.csv").unwrap();
        assert!(store.list_versions("b", "data.csv").unwrap().is_empty());

        fs::write(&src, b"second").unwrap();
        store.put(&src, "b", "data.csv").unwrap();

        let versions = store.list_versions("b", "data.csv").unwrap();
        assert_eq!(versions.len(), 1);
        let archived = store
            .root()
            .join("b")
            .join(VERSIONS_DIR)
            .join("data.csv")
            .join(&versions[0]);
        assert_eq!(fs::read(archived).unwrap(), b"first");

        let dest = temp.path().join("latest.csv");
        store.get("b", "data.csv", &dest).unwrap();
        assert_eq!(fs::read(dest).unwrap(), b"second");
    }

    #[test]
    fn unversioned_overwrite_keeps_no_history() {
        let temp = tempdir().unwrap();
        let store = LocalObjectStore::new(temp.path());
        let src = temp.path().join("src.csv");

        fs::write(&src, b"one").unwrap();
        store.put(&src, "b", "data.csv").unwrap();
        fs::write(&src, b"two").unwrap();
        store.put(&src, "b", "data.csv").unwrap();

        assert!(store.list_versions("b", "data.csv").unwrap().is_empty());
    }
}
