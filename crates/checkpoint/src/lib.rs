//! Checkpoint - persistence and restore of training job state
//!
//! A [`CheckpointRecord`] captures everything needed to resume a job. The
//! [`CheckpointStore`] owns the on-disk format; the [`CheckpointManager`]
//! decides file names, tracks the best model and rotates old checkpoints.
//!
//! # Example
//!
//! ```no_run
//! use checkpoint::{CheckpointManager, CheckpointRecord, CheckpointStore};
//! use runtime_core::{OptimizerState, StateDict, TrainingHistory};
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let config = serde_json::json!({ "arch": { "type": "Linear" } });
//! let record = CheckpointRecord::new(
//!     1,
//!     f64::INFINITY,
//!     StateDict::new(),
//!     OptimizerState::default(),
//!     &config,
//!     TrainingHistory::default(),
//! );
//!
//! let mut manager = CheckpointManager::new("/tmp/ckpt", Some(3));
//! let saved = manager.save_epoch(&record).await?;
//! let restored = CheckpointStore::load(&saved.path).await?;
//! assert_eq!(restored.epoch, 1);
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod record;
pub mod store;

pub use manager::{CheckpointManager, SavedCheckpoint, BEST_CHECKPOINT_NAME};
pub use record::CheckpointRecord;
pub use store::CheckpointStore;
