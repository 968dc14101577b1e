//! Collaborator contracts consumed by the pipeline

use crate::registry::ParameterShapes;
use runtime_core::{DeviceAssignment, Epoch, Error, OptimizerState, Result, StateDict, Tensor};
use std::collections::BTreeSet;

/// One batch of samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Stable sample identifiers
    pub ids: Vec<u64>,

    /// Input feature rows
    pub inputs: Vec<Vec<f32>>,

    /// One regression target per row
    pub targets: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Outcome of loading a state dict into a model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Keys copied into the model
    pub loaded: Vec<String>,

    /// Model keys absent from the state
    pub missing: Vec<String>,

    /// State keys the model does not have
    pub unexpected: Vec<String>,

    /// Keys present on both sides with different sizes
    pub mismatched: Vec<String>,
}

impl LoadReport {
    /// True when every key matched exactly
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

/// Trainable model
pub trait Model: Send {
    /// Compute one output per sample
    fn forward(&self, batch: &Batch) -> Tensor;

    /// Gradients of every parameter given the gradient of the outputs
    fn backward(&self, batch: &Batch, grad_output: &[f32]) -> StateDict;

    /// Snapshot of all parameters
    fn state_dict(&self) -> StateDict;

    /// Load parameters. Strict loading rejects any key or size mismatch;
    /// non-strict loading copies the compatible subset.
    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<LoadReport>;

    /// Mutable access to the trainable parameters
    fn parameters_mut(&mut self) -> &mut StateDict;

    /// Human-readable architecture description
    fn summary(&self) -> String;

    /// Parameter name to element count
    fn parameter_shapes(&self) -> ParameterShapes {
        self.state_dict()
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.len()))
            .collect()
    }

    /// Move (and replicate) the model onto the resolved devices
    fn place(&mut self, _assignment: &DeviceAssignment) {}
}

/// Shared strict/non-strict loading rule for parameter maps
pub fn load_state_into(
    params: &mut StateDict,
    state: &StateDict,
    strict: bool,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let own: BTreeSet<&String> = params.keys().collect();

    for key in state.keys() {
        if !own.contains(key) {
            report.unexpected.push(key.clone());
        }
    }
    for (key, current) in params.iter() {
        match state.get(key) {
            None => report.missing.push(key.clone()),
            Some(tensor) if tensor.len() != current.len() => report.mismatched.push(key.clone()),
            Some(_) => report.loaded.push(key.clone()),
        }
    }

    if strict && !report.is_exact() {
        let mut missing = report.missing.clone();
        missing.extend(report.mismatched.iter().cloned());
        return Err(Error::StateDictMismatch {
            missing,
            unexpected: report.unexpected,
        });
    }

    for key in &report.loaded {
        if let (Some(target), Some(source)) = (params.get_mut(key), state.get(key)) {
            target.copy_from_slice(source);
        }
    }

    Ok(report)
}

/// Source of batches for one worker
pub trait DataSource: Send {
    /// Name results and log keys are stored under
    fn name(&self) -> &str;

    /// Number of batches per epoch
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches of one epoch, in iteration order
    fn batches(&self, epoch: Epoch) -> Box<dyn Iterator<Item = Batch> + '_>;

    /// Carve a validation source out of this one, if configured to
    fn split_validation(&mut self) -> Option<Box<dyn DataSource>> {
        None
    }
}

/// Loss value plus gradient with respect to the outputs
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub value: f64,
    pub grad: Tensor,
}

/// Loss function
pub trait Loss: Send + Sync {
    fn compute(&self, outputs: &[f32], targets: &[f32]) -> LossOutput;
}

/// Read-only evaluation metric
pub trait Metric: Send + Sync {
    /// Log key of this metric
    fn name(&self) -> &str;

    fn compute(&self, outputs: &[f32], targets: &[f32]) -> f64;
}

/// Parameter update rule
pub trait Optimizer: Send {
    /// Registered type name
    fn kind(&self) -> &str;

    /// Apply one update to `params` using `grads`
    fn step(&mut self, params: &mut StateDict, grads: &StateDict);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    fn state(&self) -> OptimizerState;

    /// Restore a saved state. On `Err(Error::OptimizerState)` the optimizer
    /// must be left as it was.
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Learning-rate schedule
pub trait LrScheduler: Send {
    /// Update the optimizer's learning rate after `epoch` completes
    fn step(&mut self, optimizer: &mut dyn Optimizer, epoch: Epoch);
}
