//! Checkpoint naming, best-model tracking and rotation for one job directory

use runtime_core::{Epoch, Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::record::CheckpointRecord;
use crate::store::CheckpointStore;

/// File name of the best-so-far checkpoint
pub const BEST_CHECKPOINT_NAME: &str = "model_best.ckpt";

/// Metadata of a checkpoint written by this manager
#[derive(Debug, Clone, PartialEq)]
pub struct SavedCheckpoint {
    pub epoch: Epoch,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Writes the periodic and best checkpoints of a job.
///
/// Periodic saves are named `checkpoint-epoch{N}.ckpt`. With `keep_last` set,
/// the oldest periodic checkpoints beyond that bound are removed after each
/// successful save. The best checkpoint is never rotated.
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    keep_last: Option<usize>,

    /// Periodic checkpoints written by this manager, by epoch
    saved: BTreeMap<Epoch, SavedCheckpoint>,

    best: Option<SavedCheckpoint>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, keep_last: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            keep_last,
            saved: BTreeMap::new(),
            best: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn epoch_path(&self, epoch: Epoch) -> PathBuf {
        self.dir.join(format!("checkpoint-epoch{}.ckpt", epoch))
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT_NAME)
    }

    /// Save the periodic checkpoint for `record.epoch`, then rotate
    pub async fn save_epoch(&mut self, record: &CheckpointRecord) -> Result<SavedCheckpoint> {
        let path = self.epoch_path(record.epoch);
        let saved = Self::write(&path, record).await?;
        info!(epoch = record.epoch, path = %path.display(), "Saving checkpoint");

        self.saved.insert(record.epoch, saved.clone());
        self.rotate().await;
        Ok(saved)
    }

    /// Overwrite the best checkpoint with `record`
    pub async fn save_best(&mut self, record: &CheckpointRecord) -> Result<SavedCheckpoint> {
        let path = self.best_path();
        let saved = Self::write(&path, record).await?;
        info!(
            epoch = record.epoch,
            monitor_best = record.monitor_best,
            "Saving current best: {}",
            BEST_CHECKPOINT_NAME
        );

        self.best = Some(saved.clone());
        Ok(saved)
    }

    /// Epochs of the periodic checkpoints still on disk, oldest first
    pub fn saved_epochs(&self) -> Vec<Epoch> {
        self.saved.keys().copied().collect()
    }

    pub fn best(&self) -> Option<&SavedCheckpoint> {
        self.best.as_ref()
    }

    async fn write(path: &Path, record: &CheckpointRecord) -> Result<SavedCheckpoint> {
        let size_bytes = CheckpointStore::save(path, record)
            .await
            .map_err(|e| Error::CheckpointWriteFailed {
                message: format!("{}: {}", path.display(), e),
            })?;
        Ok(SavedCheckpoint {
            epoch: record.epoch,
            path: path.to_path_buf(),
            size_bytes,
        })
    }

    async fn rotate(&mut self) {
        let Some(keep) = self.keep_last else {
            return;
        };

        while self.saved.len() > keep {
            let Some((epoch, old)) = self.saved.pop_first() else {
                break;
            };
            match tokio::fs::remove_file(&old.path).await {
                Ok(()) => debug!(epoch, path = %old.path.display(), "Deleted old checkpoint"),
                Err(e) => {
                    warn!(epoch, path = %old.path.display(), error = %e, "Failed to delete old checkpoint")
                }
            }
        }
    }
}
