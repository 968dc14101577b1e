//! Core type definitions for the training pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// Flat tensor representation used at collaborator boundaries
pub type Tensor = Vec<f32>;

/// Named parameter tensors of a model (or gradients of the same shape)
pub type StateDict = BTreeMap<String, Tensor>;

/// How the monitored metric decides a new "best" model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MonitorMode {
    /// Lower is better
    #[serde(rename = "min", alias = "minimize")]
    Minimize,

    /// Higher is better
    #[serde(rename = "max", alias = "maximize")]
    Maximize,

    /// Never update the best value
    #[serde(rename = "off")]
    Off,
}

impl MonitorMode {
    /// Sentinel the best value starts from
    pub fn initial_best(&self) -> f64 {
        match self {
            MonitorMode::Minimize => f64::INFINITY,
            MonitorMode::Maximize | MonitorMode::Off => f64::NEG_INFINITY,
        }
    }

    /// Returns true if `candidate` strictly improves on `best`
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        match self {
            MonitorMode::Minimize => candidate < best,
            MonitorMode::Maximize => candidate > best,
            MonitorMode::Off => false,
        }
    }
}

/// Optimizer state as persisted in a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Registered optimizer type that produced this state
    pub kind: String,

    /// Number of optimizer steps taken
    pub step: Step,

    /// Current learning rate
    pub learning_rate: f64,

    /// Per-parameter buffers (momentum, moments, ...) keyed `"{buffer}.{param}"`
    pub buffers: BTreeMap<String, Tensor>,
}

/// Scalar values recorded at the end of one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochLog {
    pub epoch: Epoch,
    pub values: BTreeMap<String, f64>,
}

impl EpochLog {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Merge another log's values under a `"{prefix}_"` namespace
    pub fn merge_prefixed(&mut self, prefix: &str, other: &BTreeMap<String, f64>) {
        for (key, value) in other {
            self.values.insert(format!("{}_{}", prefix, key), *value);
        }
    }
}

/// Epoch-by-epoch history of a training job, carried across resumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub entries: Vec<EpochLog>,
}

impl TrainingHistory {
    pub fn push(&mut self, log: EpochLog) {
        self.entries.push(log);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable, checkpoint-persisted state of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    /// First epoch the next `run()` executes (1-based)
    pub start_epoch: Epoch,

    /// Lifetime iteration count of the trainer
    pub train_iteration_count: Step,

    /// Lifetime iteration count of each validator, in validation-source order
    pub valid_iteration_counts: Vec<Step>,

    /// Best value of the monitored metric seen so far
    pub monitor_best: f64,

    /// Comparison mode for the monitored metric
    pub monitor_mode: MonitorMode,

    /// Per-epoch log history
    pub history: TrainingHistory,
}

impl JobState {
    /// State of a job that starts from scratch
    pub fn fresh(monitor_mode: MonitorMode) -> Self {
        Self {
            start_epoch: 1,
            train_iteration_count: 0,
            valid_iteration_counts: Vec::new(),
            monitor_best: monitor_mode.initial_best(),
            monitor_mode,
            history: TrainingHistory::default(),
        }
    }
}
