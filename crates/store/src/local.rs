//! Directory-backed object store.
//!
//! Each key is one file directly under the root directory. The version of an
//! object is the SHA-256 of its contents. Writes go to a temporary file that
//! is renamed into place, and precondition checks are serialized within the
//! process; two processes sharing one directory are not coordinated.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dormancy::{ObjectStore, ObjectVersion, Precondition, StoreError, StoreErrorCode, VersionedObject};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::sigv4::sha256_hex;

#[derive(Debug)]
pub struct LocalDirStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(['/', '\\']);
        if !valid {
            return Err(StoreError::new(
                StoreErrorCode::Rejected,
                key,
                "key must be a plain file name",
            ));
        }
        Ok(self.root.join(key))
    }

    async fn read(&self, key: &str, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

fn io_error(key: &str, err: std::io::Error) -> StoreError {
    StoreError::new(StoreErrorCode::Io, key, err.to_string())
}

fn digest(bytes: &[u8]) -> ObjectVersion {
    ObjectVersion::new(sha256_hex(bytes))
}

fn check(
    key: &str,
    current: Option<&ObjectVersion>,
    precondition: &Precondition,
) -> Result<(), StoreError> {
    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::MustNotExist, None) => Ok(()),
        (Precondition::MustNotExist, Some(_)) => Err(StoreError::conflict(key, "object exists")),
        (Precondition::MatchVersion(expected), Some(actual)) if expected == actual => Ok(()),
        (Precondition::MatchVersion(_), Some(_)) => {
            Err(StoreError::conflict(key, "object changed since it was read"))
        }
        (Precondition::MatchVersion(_), None) => {
            Err(StoreError::conflict(key, "object no longer exists"))
        }
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn get(&self, key: &str) -> Result<VersionedObject, StoreError> {
        let path = self.path(key)?;
        let bytes = self
            .read(key, &path)
            .await?
            .ok_or_else(|| StoreError::not_found(key))?;
        Ok(VersionedObject {
            version: digest(&bytes),
            bytes,
        })
    }

    async fn version(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError> {
        let path = self.path(key)?;
        Ok(self.read(key, &path).await?.map(|bytes| digest(&bytes)))
    }

    #[instrument(skip(self, bytes), fields(root = %self.root.display(), size = bytes.len()))]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        precondition: Precondition,
    ) -> Result<ObjectVersion, StoreError> {
        let path = self.path(key)?;
        let _guard = self.lock.lock().await;

        let current = self.read(key, &path).await?.map(|b| digest(&b));
        check(key, current.as_ref(), &precondition)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(key, e))?;
        let staging = self.root.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| io_error(key, e))?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(key, e));
        }

        let version = digest(&bytes);
        debug!(%version, "Object written");
        Ok(version)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn delete(&self, key: &str, precondition: Precondition) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let _guard = self.lock.lock().await;

        let current = self.read(key, &path).await?.map(|b| digest(&b));
        check(key, current.as_ref(), &precondition)?;
        if current.is_none() {
            return Ok(());
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Object deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}
