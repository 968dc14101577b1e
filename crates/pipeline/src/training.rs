//! Training pipeline: one trainer, N validators, epoch loop with checkpoints

use checkpoint::{CheckpointManager, CheckpointRecord};
use components::{DataSource, LrScheduler, Metric, Model, Optimizer};
use runtime_core::{DeviceAssignment, Epoch, EpochLog, JobConfig, JobState, Result};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::monitor::{Monitor, MonitorOutcome};
use crate::worker::{EvalContext, LossTerm, TrainContext, Trainer, Validator, Worker};
use crate::writer::MetricsWriter;

/// Everything the manager hands over to build a training pipeline
pub struct TrainingParts {
    pub config: JobConfig,
    pub devices: DeviceAssignment,
    pub model: Box<dyn Model>,
    pub train_source: Box<dyn DataSource>,
    pub valid_sources: Vec<Box<dyn DataSource>>,
    pub losses: Vec<LossTerm>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn LrScheduler>,
    pub writer: MetricsWriter,
    pub checkpoint_dir: PathBuf,
    pub state: JobState,
}

/// Outcome of [`TrainingPipeline::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Epochs actually executed by this run
    pub epochs_run: u64,
    pub last_epoch: Option<Epoch>,
    pub monitor_best: f64,
    pub stopped_early: bool,
    pub checkpoints: Vec<PathBuf>,
    pub best_checkpoint: Option<PathBuf>,
}

pub struct TrainingPipeline {
    config: JobConfig,
    devices: DeviceAssignment,
    model: Box<dyn Model>,
    optimizer: Box<dyn Optimizer>,
    scheduler: Box<dyn LrScheduler>,
    losses: Vec<LossTerm>,
    metrics: Vec<Box<dyn Metric>>,
    trainer: Trainer,
    validators: Vec<Validator>,
    writer: MetricsWriter,
    checkpoints: CheckpointManager,
    monitor: Monitor,
    state: JobState,
}

impl TrainingPipeline {
    /// Build the worker population: one trainer over the training source and
    /// one validator per validation source, each seeded with its counter.
    pub fn new(parts: TrainingParts) -> Self {
        let TrainingParts {
            config,
            devices,
            model,
            train_source,
            valid_sources,
            losses,
            optimizer,
            scheduler,
            writer,
            checkpoint_dir,
            mut state,
        } = parts;

        let trainer = Trainer::new(train_source, state.train_iteration_count);
        let validators: Vec<Validator> = valid_sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| {
                let count = state.valid_iteration_counts.get(i).copied().unwrap_or(0);
                Validator::new(source, count)
            })
            .collect();
        state.valid_iteration_counts = validators.iter().map(Worker::iteration_count).collect();

        let trainer_config = &config.trainer;
        let monitor = Monitor::new(
            trainer_config.monitor.clone(),
            state.monitor_mode,
            state.monitor_best,
            trainer_config.early_stop,
        );
        let checkpoints = CheckpointManager::new(checkpoint_dir, trainer_config.keep_last);

        debug!(
            trainer = %trainer.name(),
            validators = validators.len(),
            start_epoch = state.start_epoch,
            "Training pipeline constructed"
        );

        Self {
            config,
            devices,
            model,
            optimizer,
            scheduler,
            losses,
            metrics: Vec::new(),
            trainer,
            validators,
            writer,
            checkpoints,
            monitor,
            state,
        }
    }

    pub fn attach_metrics(&mut self, metrics: Vec<Box<dyn Metric>>) {
        self.metrics = metrics;
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn metrics(&self) -> &[Box<dyn Metric>] {
        &self.metrics
    }

    pub fn losses(&self) -> &[LossTerm] {
        &self.losses
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn writer(&self) -> &MetricsWriter {
        &self.writer
    }

    /// Run epochs `start_epoch..=trainer.epochs`
    pub async fn run(&mut self) -> Result<TrainingSummary> {
        let epochs = self.config.trainer.epochs;
        let save_freq = self.config.trainer.save_freq;
        let first = self.state.start_epoch;
        info!(start_epoch = first, epochs, "Training started");

        let mut summary = TrainingSummary {
            epochs_run: 0,
            last_epoch: None,
            monitor_best: self.state.monitor_best,
            stopped_early: false,
            checkpoints: Vec::new(),
            best_checkpoint: None,
        };

        for epoch in first..=epochs {
            let log = self.run_epoch(epoch).await?;

            let improved = if self.validators.is_empty() {
                false
            } else {
                self.monitor.observe(&log) == MonitorOutcome::Improved
            };
            self.state.monitor_best = self.monitor.best();
            self.state.history.push(log);
            self.state.start_epoch = epoch + 1;

            if epoch % save_freq == 0 || improved {
                let record = self.record(epoch);
                if epoch % save_freq == 0 {
                    let saved = self.checkpoints.save_epoch(&record).await?;
                    summary.checkpoints.push(saved.path);
                }
                if improved {
                    let saved = self.checkpoints.save_best(&record).await?;
                    summary.best_checkpoint = Some(saved.path);
                }
            }

            summary.epochs_run += 1;
            summary.last_epoch = Some(epoch);

            if self.monitor.should_stop() {
                info!(
                    epoch,
                    patience = self.monitor.epochs_without_improvement(),
                    "Validation performance didn't improve, training stops"
                );
                summary.stopped_early = true;
                break;
            }
        }

        summary.monitor_best = self.state.monitor_best;
        info!(
            epochs_run = summary.epochs_run,
            monitor_best = summary.monitor_best,
            "Training finished"
        );
        Ok(summary)
    }

    async fn run_epoch(&mut self, epoch: Epoch) -> Result<EpochLog> {
        let mut log = EpochLog::new(epoch);

        let train = self.trainer.run_epoch(
            epoch,
            TrainContext {
                model: self.model.as_mut(),
                optimizer: self.optimizer.as_mut(),
                losses: &self.losses,
                metrics: &self.metrics,
                writer: &mut self.writer,
                devices: &self.devices,
                log_step: self.config.trainer.log_step,
            },
        );
        log.values.extend(train);

        for validator in &mut self.validators {
            let values = validator.run_epoch(
                epoch,
                EvalContext {
                    model: self.model.as_ref(),
                    losses: &self.losses,
                    metrics: &self.metrics,
                    writer: &mut self.writer,
                    devices: &self.devices,
                },
            );
            let name = validator.name().to_string();
            log.merge_prefixed(&name, &values);
        }

        self.scheduler.step(self.optimizer.as_mut(), epoch);
        let lr = self.optimizer.learning_rate();
        log.insert("lr", lr);
        self.writer.set_step(self.trainer.iteration_count(), "train");
        self.writer.add_scalar("lr", lr);
        self.writer.flush().await?;

        self.state.train_iteration_count = self.trainer.iteration_count();
        self.state.valid_iteration_counts =
            self.validators.iter().map(Worker::iteration_count).collect();

        info!(epoch, "Epoch finished");
        for (key, value) in &log.values {
            info!("    {:<24}: {:.6}", key, value);
        }
        Ok(log)
    }

    fn record(&self, epoch: Epoch) -> CheckpointRecord {
        CheckpointRecord::new(
            epoch,
            self.state.monitor_best,
            self.model.state_dict(),
            self.optimizer.state(),
            self.config.raw(),
            self.state.history.clone(),
        )
        .with_iteration_counts(
            self.state.train_iteration_count,
            self.state.valid_iteration_counts.clone(),
        )
    }
}
