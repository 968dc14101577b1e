//! Trainer and validator workers
//!
//! A worker is bound to one data source and owns its lifetime iteration
//! counter. It holds no reference to the pipeline; everything it touches
//! during an epoch is passed in through an explicit context.

use components::{Batch, DataSource, Loss, Metric, Model, Optimizer};
use runtime_core::{DeviceAssignment, Epoch, Step};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::writer::MetricsWriter;

/// Averaged scalars of one worker epoch, keyed by log name
pub type EpochValues = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Train,
    Valid,
}

pub trait Worker {
    /// Name of the bound data source
    fn name(&self) -> &str;

    fn role(&self) -> WorkerRole;

    /// Iterations completed over the worker's lifetime, across resumes
    fn iteration_count(&self) -> Step;

    /// Batches per epoch of the bound source
    fn source_len(&self) -> usize;
}

/// One weighted entry of the loss sum
pub struct LossTerm {
    pub key: String,
    pub weight: f64,
    pub loss: Box<dyn Loss>,
}

impl LossTerm {
    pub fn new(key: impl Into<String>, weight: f64, loss: Box<dyn Loss>) -> Self {
        Self {
            key: key.into(),
            weight,
            loss,
        }
    }
}

/// Everything a trainer needs for one epoch
pub struct TrainContext<'a> {
    pub model: &'a mut dyn Model,
    pub optimizer: &'a mut dyn Optimizer,
    pub losses: &'a [LossTerm],
    pub metrics: &'a [Box<dyn Metric>],
    pub writer: &'a mut MetricsWriter,
    pub devices: &'a DeviceAssignment,
    pub log_step: u64,
}

/// Everything a validator needs for one epoch
pub struct EvalContext<'a> {
    pub model: &'a dyn Model,
    pub losses: &'a [LossTerm],
    pub metrics: &'a [Box<dyn Metric>],
    pub writer: &'a mut MetricsWriter,
    pub devices: &'a DeviceAssignment,
}

/// Running per-batch mean of named scalars
#[derive(Debug, Default)]
struct Tracker {
    sums: BTreeMap<String, (f64, u64)>,
}

impl Tracker {
    fn update(&mut self, key: &str, value: f64) {
        let entry = self.sums.entry(key.to_string()).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    fn averages(self) -> EpochValues {
        self.sums
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect()
    }
}

/// Weighted loss sum. Returns the total, its gradient with respect to the
/// outputs, and the unweighted value of each term.
fn weighted_loss(
    losses: &[LossTerm],
    outputs: &[f32],
    batch: &Batch,
) -> (f64, Vec<f32>, Vec<(String, f64)>) {
    let mut total = 0.0;
    let mut grad = vec![0.0f32; outputs.len()];
    let mut terms = Vec::with_capacity(losses.len());

    for term in losses {
        let out = term.loss.compute(outputs, &batch.targets);
        total += term.weight * out.value;
        for (g, d) in grad.iter_mut().zip(&out.grad) {
            *g += term.weight as f32 * d;
        }
        terms.push((term.key.clone(), out.value));
    }
    (total, grad, terms)
}

fn record_batch(
    tracker: &mut Tracker,
    writer: &mut MetricsWriter,
    metrics: &[Box<dyn Metric>],
    total: f64,
    terms: &[(String, f64)],
    outputs: &[f32],
    targets: &[f32],
) {
    tracker.update("loss", total);
    writer.add_scalar("loss", total);
    if terms.len() > 1 {
        for (key, value) in terms {
            tracker.update(key, *value);
            writer.add_scalar(key, *value);
        }
    }
    for metric in metrics {
        let value = metric.compute(outputs, targets);
        tracker.update(metric.name(), value);
        writer.add_scalar(metric.name(), value);
    }
}

/// Updates the model over the training source
pub struct Trainer {
    source: Box<dyn DataSource>,
    iteration_count: Step,
}

impl Trainer {
    pub fn new(source: Box<dyn DataSource>, iteration_count: Step) -> Self {
        Self {
            source,
            iteration_count,
        }
    }

    /// Run one epoch over the source, updating the model after every batch
    pub fn run_epoch(&mut self, epoch: Epoch, ctx: TrainContext<'_>) -> EpochValues {
        let TrainContext {
            model,
            optimizer,
            losses,
            metrics,
            writer,
            devices,
            log_step,
        } = ctx;
        let len = self.source.len();
        debug!(epoch, source = %self.source.name(), device = %devices.device, "Training epoch");

        let mut tracker = Tracker::default();
        for (batch_idx, batch) in self.source.batches(epoch).enumerate() {
            let outputs = model.forward(&batch);
            let (total, grad, terms) = weighted_loss(losses, &outputs, &batch);
            let grads = model.backward(&batch, &grad);
            optimizer.step(model.parameters_mut(), &grads);

            self.iteration_count += 1;
            writer.set_step(self.iteration_count, "train");
            record_batch(&mut tracker, writer, metrics, total, &terms, &outputs, &batch.targets);

            if log_step > 0 && batch_idx as u64 % log_step == 0 {
                info!(
                    epoch,
                    batch = batch_idx + 1,
                    batches = len,
                    loss = total,
                    "Train epoch progress"
                );
            }
        }

        tracker.averages()
    }
}

impl Worker for Trainer {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn role(&self) -> WorkerRole {
        WorkerRole::Train
    }

    fn iteration_count(&self) -> Step {
        self.iteration_count
    }

    fn source_len(&self) -> usize {
        self.source.len()
    }
}

/// Evaluates the model over one validation source without updating it
pub struct Validator {
    source: Box<dyn DataSource>,
    iteration_count: Step,
}

impl Validator {
    pub fn new(source: Box<dyn DataSource>, iteration_count: Step) -> Self {
        Self {
            source,
            iteration_count,
        }
    }

    pub fn run_epoch(&mut self, epoch: Epoch, ctx: EvalContext<'_>) -> EpochValues {
        let EvalContext {
            model,
            losses,
            metrics,
            writer,
            devices,
        } = ctx;
        debug!(epoch, source = %self.source.name(), device = %devices.device, "Validation epoch");

        let name = self.source.name().to_string();
        let mut tracker = Tracker::default();
        for batch in self.source.batches(epoch) {
            let outputs = model.forward(&batch);
            let (total, _, terms) = weighted_loss(losses, &outputs, &batch);

            self.iteration_count += 1;
            writer.set_step(self.iteration_count, &name);
            record_batch(&mut tracker, writer, metrics, total, &terms, &outputs, &batch.targets);
        }

        tracker.averages()
    }
}

impl Worker for Validator {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn role(&self) -> WorkerRole {
        WorkerRole::Valid
    }

    fn iteration_count(&self) -> Step {
        self.iteration_count
    }

    fn source_len(&self) -> usize {
        self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use components::builtin::loss::{L1Loss, MseLoss};
    use components::builtin::metric::MeanAbsoluteError;
    use components::builtin::optim::Sgd;
    use components::builtin::linear::Linear;
    use components::builtin::synthetic::SyntheticRegression;

    fn data(n: usize) -> Box<dyn DataSource> {
        Box::new(SyntheticRegression::generate("train", n, 10, 2, 0.0, 11))
    }

    #[test]
    fn test_trainer_counts_and_learns() {
        let mut model = Linear::new(2);
        let mut optimizer = Sgd::new(0.1, 0.0, 0.0, model.parameter_shapes());
        let losses = vec![LossTerm::new("MseLoss", 1.0, Box::new(MseLoss))];
        let metrics: Vec<Box<dyn Metric>> = vec![Box::new(MeanAbsoluteError)];
        let mut writer = MetricsWriter::disabled();
        let devices = DeviceAssignment::cpu();

        let mut trainer = Trainer::new(data(100), 40);
        assert_eq!(trainer.source_len(), 10);

        let mut first = None;
        let mut last = None;
        for epoch in 1..=5 {
            let values = trainer.run_epoch(
                epoch,
                TrainContext {
                    model: &mut model,
                    optimizer: &mut optimizer,
                    losses: &losses,
                    metrics: &metrics,
                    writer: &mut writer,
                    devices: &devices,
                    log_step: 0,
                },
            );
            assert!(values.contains_key("mean_absolute_error"));
            first.get_or_insert(values["loss"]);
            last = Some(values["loss"]);
        }

        assert_eq!(trainer.iteration_count(), 40 + 5 * 10);
        assert!(last.unwrap() < first.unwrap());
    }

    #[test]
    fn test_validator_leaves_model_untouched() {
        let model = Linear::new(2);
        let before = model.state_dict();
        let losses = vec![
            LossTerm::new("mse", 0.5, Box::new(MseLoss)),
            LossTerm::new("l1", 0.5, Box::new(L1Loss)),
        ];
        let mut writer = MetricsWriter::disabled();
        let devices = DeviceAssignment::cpu();

        let mut validator = Validator::new(data(30), 0);
        let values = validator.run_epoch(
            1,
            EvalContext {
                model: &model,
                losses: &losses,
                metrics: &[],
                writer: &mut writer,
                devices: &devices,
            },
        );

        assert_eq!(model.state_dict(), before);
        assert_eq!(validator.iteration_count(), 3);
        assert_eq!(validator.role(), WorkerRole::Valid);
        let expected = 0.5 * values["mse"] + 0.5 * values["l1"];
        assert!((values["loss"] - expected).abs() < 1e-9);
    }
}
