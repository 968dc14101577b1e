//! Checkpoint file format and single-record I/O
//!
//! Layout (little endian):
//!
//! ```text
//! magic "CKPT" | version u32 | epoch u64 | body_len u64 | meta_len u32 | meta (JSON) | body (bincode)
//! ```
//!
//! The JSON metadata block can be inspected without decoding the body.
//! A record whose embedded configuration is not valid JSON is treated as
//! corrupted.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use runtime_core::{Epoch, Error, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::record::CheckpointRecord;

/// Magic bytes for checkpoint files
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

const FIXED_HEADER_LEN: usize = 4 + 4 + 8 + 8 + 4;

/// Human-readable summary stored ahead of the body
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointMetadata {
    arch: String,
    optimizer_type: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CheckpointHeader {
    epoch: Epoch,
    body_len: u64,
}

/// Reads and writes checkpoint records
pub struct CheckpointStore;

impl CheckpointStore {
    /// Persist `record` at `path`.
    ///
    /// The file is written next to its destination, synced, then renamed
    /// into place. I/O failures are returned as-is; nothing is retried.
    #[instrument(skip(record), fields(path = %path.display(), epoch = record.epoch))]
    pub async fn save(path: &Path, record: &CheckpointRecord) -> Result<u64> {
        let start = Instant::now();
        let bytes = Self::encode(record)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_path_for(path);
        if let Err(e) = write_and_rename(&temp_path, path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Io(e));
        }

        let size = bytes.len() as u64;
        info!(
            path = %path.display(),
            epoch = record.epoch,
            size_bytes = size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Checkpoint saved"
        );
        Ok(size)
    }

    /// Load the record at `path`
    #[instrument(fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<CheckpointRecord> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CheckpointNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let record = Self::decode(&bytes).map_err(|reason| Error::CheckpointCorrupted {
            path: path.display().to_string(),
            reason,
        })?;
        debug!(epoch = record.epoch, arch = %record.arch, "Checkpoint decoded");
        Ok(record)
    }

    pub fn encode(record: &CheckpointRecord) -> Result<Vec<u8>> {
        let body = bincode::serialize(record)?;
        let metadata = serde_json::to_vec(&CheckpointMetadata {
            arch: record.arch.clone(),
            optimizer_type: record.optimizer_type.clone(),
            created_at: Utc::now(),
        })?;

        let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + metadata.len() + body.len());
        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&record.epoch.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        buf.extend_from_slice(&metadata);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a full checkpoint; the error string describes the corruption
    pub fn decode(bytes: &[u8]) -> std::result::Result<CheckpointRecord, String> {
        let (header, body_offset) = Self::decode_header(bytes)?;

        let body = &bytes[body_offset..];
        if body.len() as u64 != header.body_len {
            return Err(format!(
                "body is {} bytes, header declares {}",
                body.len(),
                header.body_len
            ));
        }

        let record: CheckpointRecord =
            bincode::deserialize(body).map_err(|e| format!("undecodable body: {}", e))?;
        if record.epoch != header.epoch {
            return Err(format!(
                "header epoch {} does not match body epoch {}",
                header.epoch, record.epoch
            ));
        }
        record
            .config()
            .map_err(|e| format!("undecodable embedded config: {}", e))?;
        Ok(record)
    }

    fn decode_header(bytes: &[u8]) -> std::result::Result<(CheckpointHeader, usize), String> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(format!("truncated header ({} bytes)", bytes.len()));
        }
        if bytes[0..4] != CHECKPOINT_MAGIC {
            return Err("invalid checkpoint magic".to_string());
        }

        let version = u32::from_le_bytes(take(bytes, 4));
        if version != CHECKPOINT_VERSION {
            return Err(format!("unsupported format version {}", version));
        }
        let epoch = u64::from_le_bytes(take(bytes, 8));
        let body_len = u64::from_le_bytes(take(bytes, 16));
        let meta_len = u32::from_le_bytes(take(bytes, 24)) as usize;

        let meta_end = FIXED_HEADER_LEN + meta_len;
        if bytes.len() < meta_end {
            return Err("truncated metadata block".to_string());
        }
        serde_json::from_slice::<CheckpointMetadata>(&bytes[FIXED_HEADER_LEN..meta_end])
            .map_err(|e| format!("undecodable metadata: {}", e))?;

        Ok((CheckpointHeader { epoch, body_len }, meta_end))
    }
}

async fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, path).await
}

fn take<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{EpochLog, OptimizerState, StateDict, TrainingHistory};
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_record() -> CheckpointRecord {
        let mut state_dict = StateDict::new();
        state_dict.insert("weight".to_string(), vec![0.25, -1.5, 3.0]);
        state_dict.insert("bias".to_string(), vec![0.1]);

        let mut optimizer_state = OptimizerState {
            kind: "Sgd".to_string(),
            step: 40,
            learning_rate: 0.01,
            ..Default::default()
        };
        optimizer_state
            .buffers
            .insert("momentum.weight".to_string(), vec![0.0, 0.1, 0.2]);

        let mut history = TrainingHistory::default();
        let mut log = EpochLog::new(4);
        log.insert("loss", 0.3);
        history.push(log);

        let config = json!({
            "arch": { "type": "Linear", "args": { "in_features": 3 } },
            "optimizer": { "type": "Sgd", "args": { "lr": 0.01 } }
        });

        CheckpointRecord::new(4, f64::INFINITY, state_dict, optimizer_state, &config, history)
            .with_iteration_counts(40, vec![8])
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/checkpoint-epoch4.ckpt");
        let record = sample_record();

        let size = CheckpointStore::save(&path, &record).await.unwrap();
        assert!(size > FIXED_HEADER_LEN as u64);
        assert!(!dir.path().join("run/checkpoint-epoch4.ckpt.tmp").exists());

        let loaded = CheckpointStore::load(&path).await.unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.monitor_best.is_infinite());

        let bytes = tokio::fs::read(&path).await.unwrap();
        let (header, _) = CheckpointStore::decode_header(&bytes).unwrap();
        assert_eq!(header.epoch, 4);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = tempdir().unwrap();
        let err = CheckpointStore::load(&dir.path().join("missing.ckpt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CheckpointNotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.ckpt");
        tokio::fs::write(&path, b"definitely not a checkpoint").await.unwrap();

        let err = CheckpointStore::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::CheckpointCorrupted { .. }));
    }

    #[test]
    fn test_truncated_body_is_corrupt() {
        let bytes = CheckpointStore::encode(&sample_record()).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        let reason = CheckpointStore::decode(truncated).unwrap_err();
        assert!(reason.contains("header declares"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        // A directory in the way makes the final rename fail
        let path = dir.path().join("checkpoint-epoch4.ckpt");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = CheckpointStore::save(&path, &sample_record()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!dir.path().join("checkpoint-epoch4.ckpt.tmp").exists());
    }

    #[tokio::test]
    async fn test_unreadable_embedded_config_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint-epoch4.ckpt");
        let record = sample_record();
        let mut bytes = CheckpointStore::encode(&record).unwrap();

        // Same length, so the framing stays valid and only the JSON breaks
        let config = record.config().unwrap().to_string();
        let at = bytes
            .windows(config.len())
            .position(|w| w == config.as_bytes())
            .unwrap();
        bytes[at] = b'#';
        tokio::fs::write(&path, &bytes).await.unwrap();

        let err = CheckpointStore::load(&path).await.unwrap_err();
        assert!(
            matches!(err, Error::CheckpointCorrupted { ref reason, .. } if reason.contains("embedded config"))
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_flipped_magic_is_corrupt() {
        let mut bytes = CheckpointStore::encode(&sample_record()).unwrap();
        bytes[0] = b'X';
        assert!(CheckpointStore::decode(&bytes).is_err());
    }
}
