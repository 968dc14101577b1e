//! Single-output linear model

use crate::traits::{load_state_into, Batch, LoadReport, Model};
use crate::Args;
use runtime_core::{Device, DeviceAssignment, Result, StateDict, Tensor};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LinearArgs {
    in_features: usize,
}

/// `y = w . x + b`
#[derive(Debug, Clone)]
pub struct Linear {
    in_features: usize,
    params: StateDict,
    device: Device,
}

impl Linear {
    /// Zero-initialized model
    pub fn new(in_features: usize) -> Self {
        let mut params = StateDict::new();
        params.insert("weight".to_string(), vec![0.0; in_features]);
        params.insert("bias".to_string(), vec![0.0]);
        Self {
            in_features,
            params,
            device: Device::Cpu,
        }
    }

    pub fn from_args(args: Args<'_>, _: ()) -> Result<Box<dyn Model>> {
        let args: LinearArgs = args.parse()?;
        Ok(Box::new(Self::new(args.in_features)))
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn weight(&self) -> &[f32] {
        self.params.get("weight").map(Vec::as_slice).unwrap_or(&[])
    }

    fn bias(&self) -> f32 {
        self.params
            .get("bias")
            .and_then(|b| b.first().copied())
            .unwrap_or(0.0)
    }
}

impl Model for Linear {
    fn forward(&self, batch: &Batch) -> Tensor {
        let weight = self.weight();
        let bias = self.bias();
        batch
            .inputs
            .iter()
            .map(|row| row.iter().zip(weight).map(|(x, w)| x * w).sum::<f32>() + bias)
            .collect()
    }

    fn backward(&self, batch: &Batch, grad_output: &[f32]) -> StateDict {
        let mut grad_weight = vec![0.0; self.in_features];
        let mut grad_bias = 0.0;
        for (row, g) in batch.inputs.iter().zip(grad_output) {
            for (gw, x) in grad_weight.iter_mut().zip(row) {
                *gw += g * x;
            }
            grad_bias += g;
        }

        let mut grads = StateDict::new();
        grads.insert("weight".to_string(), grad_weight);
        grads.insert("bias".to_string(), vec![grad_bias]);
        grads
    }

    fn state_dict(&self) -> StateDict {
        self.params.clone()
    }

    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<LoadReport> {
        load_state_into(&mut self.params, state, strict)
    }

    fn parameters_mut(&mut self) -> &mut StateDict {
        &mut self.params
    }

    fn summary(&self) -> String {
        let trainable: usize = self.params.values().map(Vec::len).sum();
        format!(
            "Linear(in_features={}, out_features=1)\nTrainable parameters: {}",
            self.in_features, trainable
        )
    }

    fn place(&mut self, assignment: &DeviceAssignment) {
        debug!(device = %assignment.device, replicas = assignment.device_ids.len(), "Placing Linear model");
        self.device = assignment.device;
    }
}
