//! Regression losses, mean-reduced over the batch

use crate::traits::{Loss, LossOutput};
use crate::Args;
use runtime_core::Result;

/// Mean squared error
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl MseLoss {
    pub fn from_args(_args: Args<'_>, _: ()) -> Result<Box<dyn Loss>> {
        Ok(Box::new(MseLoss))
    }
}

impl Loss for MseLoss {
    fn compute(&self, outputs: &[f32], targets: &[f32]) -> LossOutput {
        let n = outputs.len().min(targets.len());
        if n == 0 {
            return LossOutput {
                value: 0.0,
                grad: vec![0.0; outputs.len()],
            };
        }

        let scale = 1.0 / n as f32;
        let mut value = 0.0f64;
        let grad = outputs
            .iter()
            .zip(targets)
            .map(|(o, t)| {
                let diff = o - t;
                value += f64::from(diff * diff);
                2.0 * diff * scale
            })
            .collect();

        LossOutput {
            value: value / n as f64,
            grad,
        }
    }
}

/// Mean absolute error
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Loss;

impl L1Loss {
    pub fn from_args(_args: Args<'_>, _: ()) -> Result<Box<dyn Loss>> {
        Ok(Box::new(L1Loss))
    }
}

impl Loss for L1Loss {
    fn compute(&self, outputs: &[f32], targets: &[f32]) -> LossOutput {
        let n = outputs.len().min(targets.len());
        if n == 0 {
            return LossOutput {
                value: 0.0,
                grad: vec![0.0; outputs.len()],
            };
        }

        let scale = 1.0 / n as f32;
        let mut value = 0.0f64;
        let grad = outputs
            .iter()
            .zip(targets)
            .map(|(o, t)| {
                let diff = o - t;
                value += f64::from(diff.abs());
                if diff > 0.0 {
                    scale
                } else if diff < 0.0 {
                    -scale
                } else {
                    0.0
                }
            })
            .collect();

        LossOutput {
            value: value / n as f64,
            grad,
        }
    }
}
