//! Job configuration schema
//!
//! A job is described by a single JSON document. Every pluggable component is
//! a `{ "type": ..., "args": { ... } }` pair resolved through the component
//! registry; the remaining sections are scalar job parameters.

use crate::{Error, MonitorMode, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Experiment name, used in checkpoint and log directory names
    pub name: String,

    /// Number of accelerator devices requested
    pub n_gpu: usize,

    /// Model architecture
    pub arch: ComponentSpec,

    /// Training data source
    pub data_loader: ComponentSpec,

    /// Explicit validation data sources. When absent the training source's
    /// validation split is used instead.
    #[serde(default)]
    pub valid_data_loaders: Option<Vec<ComponentSpec>>,

    /// Optimizer bound to the model's trainable parameters
    pub optimizer: ComponentSpec,

    /// Learning-rate scheduler bound to the optimizer
    pub lr_scheduler: ComponentSpec,

    /// Weighted loss terms
    pub losses: Vec<LossSpec>,

    /// Evaluation metrics
    pub metrics: Vec<ComponentSpec>,

    /// Training loop settings
    pub trainer: TrainerConfig,

    /// Scalar writer settings
    #[serde(default)]
    pub visualization: Option<VisualizationConfig>,

    /// Document exactly as it was read
    #[serde(skip)]
    raw: Value,
}

impl JobConfig {
    /// Parse and validate a configuration document
    pub fn from_value(raw: Value) -> Result<Self> {
        let mut config: JobConfig =
            serde_json::from_value(raw.clone()).map_err(|e| Error::InvalidConfig {
                message: e.to_string(),
            })?;
        config.raw = raw;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration document from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text).map_err(|e| Error::InvalidConfig {
            message: e.to_string(),
        })?;
        Self::from_value(raw)
    }

    /// The document this config was parsed from
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn validate(&self) -> Result<()> {
        if self.trainer.epochs == 0 {
            return Err(invalid("trainer.epochs must be at least 1"));
        }
        if self.trainer.save_freq == 0 {
            return Err(invalid("trainer.save_freq must be at least 1"));
        }
        if self.trainer.keep_last == Some(0) {
            return Err(invalid("trainer.keep_last must be at least 1 when set"));
        }
        if self.trainer.monitor_mode != MonitorMode::Off && self.trainer.monitor.is_empty() {
            return Err(invalid(
                "trainer.monitor must name a metric unless monitor_mode is 'off'",
            ));
        }
        if self.losses.is_empty() {
            return Err(invalid("at least one loss entry is required"));
        }

        let mut keys = HashSet::new();
        for loss in &self.losses {
            if !keys.insert(loss.key()) {
                return Err(invalid(format!(
                    "duplicate loss key '{}', set distinct nicknames",
                    loss.key()
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        message: message.into(),
    }
}

/// A pluggable component: registered type name plus constructor arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ComponentSpec {
    pub fn new(type_name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            type_name: type_name.into(),
            args,
        }
    }

    /// Decode the constructor arguments into a typed struct.
    ///
    /// Missing required fields surface as a resolution error for `section`.
    pub fn parse_args<A: DeserializeOwned>(&self, section: &str) -> Result<A> {
        serde_json::from_value(Value::Object(self.args.clone())).map_err(|e| {
            Error::resolution(
                section,
                format!("invalid arguments for '{}': {}", self.type_name, e),
            )
        })
    }
}

/// One weighted loss term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossSpec {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub args: Map<String, Value>,

    /// Multiplier applied to this term in the total loss
    pub weight: f64,

    /// Key the term is logged under; defaults to the type name
    #[serde(default)]
    pub nickname: Option<String>,
}

impl LossSpec {
    pub fn key(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.type_name)
    }

    pub fn component(&self) -> ComponentSpec {
        ComponentSpec {
            type_name: self.type_name.clone(),
            args: self.args.clone(),
        }
    }
}

/// Training loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Last epoch to run (inclusive, 1-based)
    pub epochs: u64,

    /// Save a periodic checkpoint every N epochs
    pub save_freq: u64,

    /// Epoch-log key of the monitored metric, e.g. `valid_loss`
    #[serde(default)]
    pub monitor: String,

    pub monitor_mode: MonitorMode,

    /// Root directory for checkpoint directories
    pub save_dir: PathBuf,

    /// Keep only the newest N periodic checkpoints
    #[serde(default)]
    pub keep_last: Option<usize>,

    /// Stop after this many epochs without improvement
    #[serde(default)]
    pub early_stop: Option<u64>,

    /// Log training progress every N iterations
    #[serde(default = "default_log_step")]
    pub log_step: u64,
}

fn default_log_step() -> u64 {
    10
}

/// Scalar writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// Root directory for writer output
    pub log_dir: PathBuf,

    #[serde(default = "default_enabled", alias = "tensorboardX")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
