//! Pipeline - orchestration of a model training job
//!
//! The [`PipelineManager`] turns a [`JobConfig`](runtime_core::JobConfig)
//! into a runnable pipeline:
//! - **Setup**: device resolution, component construction, pretrained
//!   weights and checkpoint resume, in a fixed stage order
//! - **Training**: one trainer and N validators driven through epochs, with
//!   best-model tracking and periodic checkpoints
//! - **Testing**: inference over every data source, results stored as JSON
//!
//! # Example
//!
//! ```no_run
//! use components::ComponentRegistry;
//! use pipeline::{ManagerOptions, PipelineManager};
//! use runtime_core::JobConfig;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let config = JobConfig::from_json_str(&std::fs::read_to_string("config.json")?)?;
//! let registry = ComponentRegistry::with_builtins();
//! let mut manager = PipelineManager::setup(config, ManagerOptions::default(), &registry).await?;
//! manager.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod monitor;
pub mod testing;
pub mod training;
pub mod worker;
pub mod writer;

pub use manager::{ManagerOptions, Pipeline, PipelineManager, RunMode, RunSummary, SetupStage};
pub use monitor::{Monitor, MonitorOutcome};
pub use testing::{InferenceResults, TestingPipeline, TestingSummary};
pub use training::{TrainingParts, TrainingPipeline, TrainingSummary};
pub use worker::{LossTerm, Trainer, Validator, Worker, WorkerRole};
pub use writer::MetricsWriter;
