//! Learning-rate schedules

use crate::traits::{LrScheduler, Optimizer};
use crate::Args;
use runtime_core::{Epoch, Error, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StepLrArgs {
    step_size: u64,
    #[serde(default = "default_gamma")]
    gamma: f64,
}

fn default_gamma() -> f64 {
    0.1
}

/// Decay the base rate by `gamma` every `step_size` epochs.
///
/// The rate is a pure function of the epoch, so a resumed run lands on the
/// same schedule.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: u64,
    gamma: f64,
}

impl StepLr {
    /// # Panics
    ///
    /// Panics if `step_size` is 0.
    pub fn new(base_lr: f64, step_size: u64, gamma: f64) -> Self {
        assert!(step_size > 0, "step_size must be non-zero");
        Self {
            base_lr,
            step_size,
            gamma,
        }
    }

    pub fn from_args(args: Args<'_>, base_lr: f64) -> Result<Box<dyn LrScheduler>> {
        let section = args.section();
        let args: StepLrArgs = args.parse()?;
        if args.step_size == 0 {
            return Err(Error::resolution(section, "step_size must be at least 1"));
        }
        Ok(Box::new(Self::new(base_lr, args.step_size, args.gamma)))
    }

    pub fn rate_after(&self, epoch: Epoch) -> f64 {
        self.base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

impl LrScheduler for StepLr {
    fn step(&mut self, optimizer: &mut dyn Optimizer, epoch: Epoch) {
        optimizer.set_learning_rate(self.rate_after(epoch));
    }
}

/// Keep the optimizer's rate unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantLr;

impl ConstantLr {
    pub fn from_args(_args: Args<'_>, _base_lr: f64) -> Result<Box<dyn LrScheduler>> {
        Ok(Box::new(ConstantLr))
    }
}

impl LrScheduler for ConstantLr {
    fn step(&mut self, _optimizer: &mut dyn Optimizer, _epoch: Epoch) {}
}
