//! Storage - artifact persistence for training runs
//!
//! Run outputs that are not checkpoints (the provenance copy of the job
//! configuration, inference results keyed by data source) are written through
//! a [`StorageBackend`]. JSON helpers sit on top of the raw byte interface.
//!
//! # Example
//!
//! ```no_run
//! use storage::{json, LocalStorage};
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/run");
//! json::write_pretty(&storage, "config.json", &serde_json::json!({ "name": "demo" })).await?;
//! let config: serde_json::Value = json::read(&storage, "config.json").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod json;
mod local;

pub use backend::StorageBackend;
pub use local::LocalStorage;
