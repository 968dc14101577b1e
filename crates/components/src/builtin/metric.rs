//! Regression metrics

use crate::traits::Metric;
use crate::Args;
use runtime_core::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub fn from_args(_args: Args<'_>, _: ()) -> Result<Box<dyn Metric>> {
        Ok(Box::new(MeanSquaredError))
    }
}

impl Metric for MeanSquaredError {
    fn name(&self) -> &str {
        "mean_squared_error"
    }

    fn compute(&self, outputs: &[f32], targets: &[f32]) -> f64 {
        mean(outputs, targets, |d| d * d)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAbsoluteError;

impl MeanAbsoluteError {
    pub fn from_args(_args: Args<'_>, _: ()) -> Result<Box<dyn Metric>> {
        Ok(Box::new(MeanAbsoluteError))
    }
}

impl Metric for MeanAbsoluteError {
    fn name(&self) -> &str {
        "mean_absolute_error"
    }

    fn compute(&self, outputs: &[f32], targets: &[f32]) -> f64 {
        mean(outputs, targets, f64::abs)
    }
}

fn mean(outputs: &[f32], targets: &[f32], f: impl Fn(f64) -> f64) -> f64 {
    let n = outputs.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    let total: f64 = outputs
        .iter()
        .zip(targets)
        .map(|(o, t)| f(f64::from(*o) - f64::from(*t)))
        .sum();
    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let outputs = [1.0, 2.0, 4.0];
        let targets = [1.0, 3.0, 2.0];
        assert!((MeanAbsoluteError.compute(&outputs, &targets) - 1.0).abs() < 1e-9);
        assert!((MeanSquaredError.compute(&outputs, &targets) - 5.0 / 3.0).abs() < 1e-9);
    }
}
