//! Runtime Core - Foundation for the training pipeline
//!
//! Provides the job configuration schema, shared state types, device
//! resolution and the error taxonomy used by every other crate.

pub mod config;
pub mod device;
pub mod error;
pub mod types;

pub use config::{ComponentSpec, JobConfig, LossSpec, TrainerConfig, VisualizationConfig};
pub use device::{resolve_devices, Device, DeviceAssignment};
pub use error::{Error, Result, SetupWarning};
pub use types::*;
