//! JSON helpers over any [`StorageBackend`]

use crate::StorageBackend;
use bytes::Bytes;
use runtime_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize `value` as pretty JSON and store it at `key`
pub async fn write_pretty<S, T>(storage: &S, key: &str, value: &T) -> Result<u64>
where
    S: StorageBackend + ?Sized,
    T: Serialize + ?Sized,
{
    let mut text = serde_json::to_vec_pretty(value)?;
    text.push(b'\n');
    storage.write(key, Bytes::from(text)).await
}

/// Read and deserialize the JSON artifact at `key`
pub async fn read<S, T>(storage: &S, key: &str) -> Result<T>
where
    S: StorageBackend + ?Sized,
    T: DeserializeOwned,
{
    let data = storage.read(key).await?;
    serde_json::from_slice(&data).map_err(|e| Error::Serialization(format!("{}: {}", key, e)))
}
