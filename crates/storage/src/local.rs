//! Local filesystem storage backend

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::StorageBackend;

/// Artifacts stored as files below a root directory.
///
/// Writes go to a hidden sibling temp file which is synced and then renamed
/// over the destination.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of the artifact at `key`
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn staging_path(target: &Path) -> PathBuf {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()))
    }

    async fn commit(staging: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(staging).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(staging, target).await
    }

    fn storage_error(action: &str, key: &str, e: std::io::Error) -> Error {
        if e.kind() == ErrorKind::NotFound {
            Error::StoragePathNotFound {
                path: key.to_string(),
            }
        } else {
            Error::Storage {
                message: format!("Failed to {} {}: {}", action, key, e),
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Bytes> {
        fs::read(self.path_of(key))
            .await
            .map(Bytes::from)
            .map_err(|e| Self::storage_error("read", key, e))
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let target = self.path_of(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::Storage {
                message: format!("Failed to create directory {}: {}", parent.display(), e),
            })?;
        }

        let staging = Self::staging_path(&target);
        if let Err(e) = Self::commit(&staging, &target, &data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(Self::storage_error("write", key, e));
        }

        debug!(path = %target.display(), bytes = data.len(), "Artifact written");
        Ok(data.len() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.path_of(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::storage_error("stat", key, e)),
        }
    }
}
