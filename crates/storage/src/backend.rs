//! Storage backend trait definition

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::Result;

/// Byte-level artifact storage addressed by relative keys
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the artifact at `key`.
    ///
    /// Fails with `StoragePathNotFound` when nothing is stored there.
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Store `data` at `key`, replacing any previous artifact. Readers never
    /// observe a partially written artifact.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, key: &str, data: Bytes) -> Result<u64>;

    /// Whether an artifact is stored at `key`
    async fn exists(&self, key: &str) -> Result<bool>;
}
