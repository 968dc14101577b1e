//! Pipeline manager: builds a runnable pipeline from a job configuration
//!
//! Setup is a fixed sequence of stages, each a precondition for the next:
//!
//! ```text
//! device-resolved -> model-constructed -> [pretrained-weights-loaded]
//!   -> [checkpoint-resumed] -> data-sources-constructed
//!   -> checkpoint-dir-prepared -> writer-prepared
//!   -> train: validation-sources-constructed -> losses-constructed
//!             -> optimizer-constructed -> scheduler-constructed
//!             -> training-pipeline-constructed
//!   -> test:  testing-pipeline-constructed
//!   -> evaluation-metrics-constructed
//! ```
//!
//! Any error aborts setup; no partially built pipeline is ever returned.
//! Non-fatal conditions are logged when detected and collected as
//! [`SetupWarning`]s.

use checkpoint::{CheckpointRecord, CheckpointStore};
use chrono::Local;
use components::{ComponentRegistry, DataSource, Metric, Model};
use runtime_core::device::probe_available_devices;
use runtime_core::{
    resolve_devices, ComponentSpec, DeviceAssignment, Epoch, Error, JobConfig, JobState,
    OptimizerState, Result, SetupWarning, Step,
};
use std::fmt;
use std::path::{Path, PathBuf};
use storage::{json, LocalStorage};
use tracing::{debug, info, instrument, warn};

use crate::testing::{TestingPipeline, TestingSummary};
use crate::training::{TrainingParts, TrainingPipeline, TrainingSummary};
use crate::worker::LossTerm;
use crate::writer::MetricsWriter;

/// Whether the job trains or only runs inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RunMode {
    #[default]
    Train,
    Test,
}

/// Per-invocation settings that are not part of the job configuration
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    pub mode: RunMode,

    /// Checkpoint to resume from
    pub resume: Option<PathBuf>,

    /// Checkpoint whose weights initialize the model
    pub pretrained: Option<PathBuf>,

    /// Directory inference results are written to in test mode. Defaults to
    /// the checkpoint directory.
    pub save_dir: Option<PathBuf>,

    /// Skip sources whose inference results already exist
    pub skip_exists: bool,

    /// Accelerator count to assume instead of probing the environment
    pub available_devices: Option<usize>,
}

/// Setup stages in the order they are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    DeviceResolved,
    ModelConstructed,
    PretrainedWeightsLoaded,
    CheckpointResumed,
    DataSourcesConstructed,
    CheckpointDirPrepared,
    WriterPrepared,
    ValidationSourcesConstructed,
    LossesConstructed,
    OptimizerConstructed,
    SchedulerConstructed,
    TrainingPipelineConstructed,
    TestingPipelineConstructed,
    EvaluationMetricsConstructed,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::DeviceResolved => "device-resolved",
            SetupStage::ModelConstructed => "model-constructed",
            SetupStage::PretrainedWeightsLoaded => "pretrained-weights-loaded",
            SetupStage::CheckpointResumed => "checkpoint-resumed",
            SetupStage::DataSourcesConstructed => "data-sources-constructed",
            SetupStage::CheckpointDirPrepared => "checkpoint-dir-prepared",
            SetupStage::WriterPrepared => "writer-prepared",
            SetupStage::ValidationSourcesConstructed => "validation-sources-constructed",
            SetupStage::LossesConstructed => "losses-constructed",
            SetupStage::OptimizerConstructed => "optimizer-constructed",
            SetupStage::SchedulerConstructed => "scheduler-constructed",
            SetupStage::TrainingPipelineConstructed => "training-pipeline-constructed",
            SetupStage::TestingPipelineConstructed => "testing-pipeline-constructed",
            SetupStage::EvaluationMetricsConstructed => "evaluation-metrics-constructed",
        };
        f.write_str(name)
    }
}

/// The pipeline a manager built
pub enum Pipeline {
    Training(TrainingPipeline),
    Testing(TestingPipeline),
}

impl Pipeline {
    fn attach_metrics(&mut self, metrics: Vec<Box<dyn Metric>>) {
        match self {
            Pipeline::Training(p) => p.attach_metrics(metrics),
            Pipeline::Testing(p) => p.attach_metrics(metrics),
        }
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        match self {
            Pipeline::Training(p) => p.run().await.map(RunSummary::Training),
            Pipeline::Testing(p) => p.run().await.map(RunSummary::Testing),
        }
    }

    pub fn as_training(&self) -> Option<&TrainingPipeline> {
        match self {
            Pipeline::Training(p) => Some(p),
            Pipeline::Testing(_) => None,
        }
    }

    pub fn as_testing(&self) -> Option<&TestingPipeline> {
        match self {
            Pipeline::Testing(p) => Some(p),
            Pipeline::Training(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    Training(TrainingSummary),
    Testing(TestingSummary),
}

/// Resume state that can only be applied once later stages exist
#[derive(Debug)]
struct PendingResume {
    epoch: Epoch,
    train_iteration_count: Option<Step>,
    valid_iteration_counts: Option<Vec<Step>>,

    /// `None` when the optimizer type changed
    optimizer_state: Option<OptimizerState>,
}

#[derive(Debug, Default)]
struct SetupReport {
    stages: Vec<SetupStage>,
    warnings: Vec<SetupWarning>,
}

impl SetupReport {
    fn reach(&mut self, stage: SetupStage) {
        debug!(stage = %stage, "Setup stage reached");
        self.stages.push(stage);
    }
}

pub struct PipelineManager {
    config: JobConfig,
    start_time: String,
    devices: DeviceAssignment,
    checkpoint_dir: PathBuf,
    writer_dir: PathBuf,
    report: SetupReport,
    pipeline: Pipeline,
}

impl PipelineManager {
    /// Run every setup stage for `config` and return the ready pipeline
    #[instrument(skip_all, fields(name = %config.name, mode = ?options.mode))]
    pub async fn setup(
        config: JobConfig,
        options: ManagerOptions,
        registry: &ComponentRegistry,
    ) -> Result<Self> {
        let start_time = Local::now().format("%m%d_%H%M%S").to_string();
        let mut report = SetupReport::default();
        let mut state = JobState::fresh(config.trainer.monitor_mode);

        // Devices
        let available = options
            .available_devices
            .unwrap_or_else(probe_available_devices);
        let (devices, warning) = resolve_devices(config.n_gpu, available);
        report.warnings.extend(warning);
        report.reach(SetupStage::DeviceResolved);

        // Model
        let mut model = registry.models.construct("arch", &config.arch, ())?;
        info!("{}", model.summary());
        model.place(&devices);
        if devices.is_replicated() {
            info!(device_ids = ?devices.device_ids, "Model replicated across devices");
        }
        report.reach(SetupStage::ModelConstructed);

        if let Some(path) = &options.pretrained {
            load_pretrained(path, model.as_mut()).await?;
            report.reach(SetupStage::PretrainedWeightsLoaded);
        }

        let pending = match &options.resume {
            Some(path) => {
                let pending =
                    resume_checkpoint(path, &config, model.as_mut(), &mut state, &mut report)
                        .await?;
                report.reach(SetupStage::CheckpointResumed);
                Some(pending)
            }
            None => None,
        };

        // Data
        let mut train_source =
            registry
                .data_sources
                .construct("data_loader", &config.data_loader, ())?;
        info!(source = %train_source.name(), batches = train_source.len(), "Training data source ready");
        report.reach(SetupStage::DataSourcesConstructed);

        let checkpoint_dir = config
            .trainer
            .save_dir
            .join(&config.name)
            .join(&start_time);
        prepare_checkpoint_dir(&checkpoint_dir, &config).await?;
        report.reach(SetupStage::CheckpointDirPrepared);

        let (writer_dir, writer_enabled) = match &config.visualization {
            Some(vis) => (vis.log_dir.join(&config.name).join(&start_time), vis.enabled),
            None => (checkpoint_dir.clone(), true),
        };
        let writer = MetricsWriter::create(&writer_dir, writer_enabled).await?;
        report.reach(SetupStage::WriterPrepared);

        let mut pipeline = match options.mode {
            RunMode::Train => {
                let valid_sources =
                    build_validation_sources(&config, registry, train_source.as_mut())?;
                if let Some(pending) = &pending {
                    derive_iteration_counts(
                        pending,
                        train_source.as_ref(),
                        &valid_sources,
                        &mut state,
                    );
                }
                report.reach(SetupStage::ValidationSourcesConstructed);

                let losses = build_losses(&config, registry)?;
                report.reach(SetupStage::LossesConstructed);

                let mut optimizer = registry.optimizers.construct(
                    "optimizer",
                    &config.optimizer,
                    model.parameter_shapes(),
                )?;
                let base_lr = optimizer.learning_rate();
                if let Some(saved) = pending.as_ref().and_then(|p| p.optimizer_state.clone()) {
                    // A rejected state leaves the optimizer untouched
                    match optimizer.load_state(saved) {
                        Ok(()) => info!(kind = %optimizer.kind(), "Optimizer state restored"),
                        Err(Error::OptimizerState { message }) => {
                            let w = SetupWarning::OptimizerStateIncompatible { reason: message };
                            warn!("{}", w);
                            report.warnings.push(w);
                        }
                        Err(e) => return Err(e),
                    }
                }
                report.reach(SetupStage::OptimizerConstructed);

                let scheduler =
                    registry
                        .schedulers
                        .construct("lr_scheduler", &config.lr_scheduler, base_lr)?;
                report.reach(SetupStage::SchedulerConstructed);

                let pipeline = TrainingPipeline::new(TrainingParts {
                    config: config.clone(),
                    devices: devices.clone(),
                    model,
                    train_source,
                    valid_sources,
                    losses,
                    optimizer,
                    scheduler,
                    writer,
                    checkpoint_dir: checkpoint_dir.clone(),
                    state,
                });
                report.reach(SetupStage::TrainingPipelineConstructed);
                Pipeline::Training(pipeline)
            }
            RunMode::Test => {
                let mut sources = vec![train_source];
                if let Some(specs) = &config.valid_data_loaders {
                    sources.extend(construct_sources(specs, registry)?);
                }
                let output_dir = options
                    .save_dir
                    .clone()
                    .unwrap_or_else(|| checkpoint_dir.clone());
                let pipeline = TestingPipeline::new(
                    model,
                    devices.clone(),
                    sources,
                    output_dir,
                    options.skip_exists,
                );
                report.reach(SetupStage::TestingPipelineConstructed);
                Pipeline::Testing(pipeline)
            }
        };

        let metrics = config
            .metrics
            .iter()
            .enumerate()
            .map(|(i, spec)| registry.metrics.construct(&format!("metrics[{}]", i), spec, ()))
            .collect::<Result<Vec<_>>>()?;
        pipeline.attach_metrics(metrics);
        report.reach(SetupStage::EvaluationMetricsConstructed);

        info!(
            checkpoint_dir = %checkpoint_dir.display(),
            warnings = report.warnings.len(),
            "Pipeline setup complete"
        );

        Ok(Self {
            config,
            start_time,
            devices,
            checkpoint_dir,
            writer_dir,
            report,
            pipeline,
        })
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        self.pipeline.run().await
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run timestamp used in directory names, `%m%d_%H%M%S`
    pub fn start_time(&self) -> &str {
        &self.start_time
    }

    pub fn devices(&self) -> &DeviceAssignment {
        &self.devices
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn writer_dir(&self) -> &Path {
        &self.writer_dir
    }

    /// Stages reached during setup, in order
    pub fn stages(&self) -> &[SetupStage] {
        &self.report.stages
    }

    pub fn warnings(&self) -> &[SetupWarning] {
        &self.report.warnings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn into_pipeline(self) -> Pipeline {
        self.pipeline
    }
}

async fn load_pretrained(path: &Path, model: &mut dyn Model) -> Result<()> {
    info!(path = %path.display(), "Loading pretrained checkpoint");
    let record = CheckpointStore::load(path).await.map_err(|e| match e {
        Error::CheckpointNotFound { path } => Error::PretrainedNotFound { path },
        other => other,
    })?;

    let report = model.load_state_dict(&record.state_dict, false)?;
    info!(
        loaded = report.loaded.len(),
        missing = ?report.missing,
        unexpected = ?report.unexpected,
        mismatched = ?report.mismatched,
        "Pretrained weights loaded"
    );
    Ok(())
}

async fn resume_checkpoint(
    path: &Path,
    config: &JobConfig,
    model: &mut dyn Model,
    state: &mut JobState,
    report: &mut SetupReport,
) -> Result<PendingResume> {
    info!(path = %path.display(), "Loading checkpoint");
    let record = CheckpointStore::load(path).await?;
    let saved_config = record.config().map_err(|e| Error::CheckpointCorrupted {
        path: path.display().to_string(),
        reason: format!("embedded config: {}", e),
    })?;

    let saved_arch = &saved_config["arch"];
    let arch_matches = serde_json::from_value::<ComponentSpec>(saved_arch.clone())
        .map(|spec| spec == config.arch)
        .unwrap_or(false);
    if !arch_matches {
        let w = SetupWarning::ArchitectureMismatch {
            checkpoint: saved_arch.to_string(),
            live: config.raw()["arch"].to_string(),
        };
        warn!("{}", w);
        report.warnings.push(w);
    }

    let load = model.load_state_dict(&record.state_dict, arch_matches)?;
    if !load.is_exact() {
        warn!(
            missing = ?load.missing,
            unexpected = ?load.unexpected,
            mismatched = ?load.mismatched,
            "Checkpoint weights loaded partially"
        );
    }

    let optimizer_state = if record.optimizer_type == config.optimizer.type_name {
        Some(record.optimizer_state.clone())
    } else {
        let w = SetupWarning::OptimizerMismatch {
            checkpoint: record.optimizer_type.clone(),
            live: config.optimizer.type_name.clone(),
        };
        warn!("{}", w);
        report.warnings.push(w);
        None
    };

    let CheckpointRecord {
        epoch,
        monitor_best,
        train_iteration_count,
        valid_iteration_counts,
        logger_history,
        ..
    } = record;

    state.start_epoch = epoch + 1;
    state.monitor_best = monitor_best;
    state.history = logger_history;

    info!(path = %path.display(), start_epoch = state.start_epoch, "Checkpoint loaded");
    Ok(PendingResume {
        epoch,
        train_iteration_count,
        valid_iteration_counts,
        optimizer_state,
    })
}

/// Seed worker counters from the checkpoint, or estimate them as
/// `(epoch - 1) * len(source)`. The estimate is wrong if batch sizing
/// changed between runs.
fn derive_iteration_counts(
    pending: &PendingResume,
    train_source: &dyn DataSource,
    valid_sources: &[Box<dyn DataSource>],
    state: &mut JobState,
) {
    let completed = pending.epoch.saturating_sub(1);
    let estimate = |len: usize| completed * len as Step;

    state.train_iteration_count = pending
        .train_iteration_count
        .unwrap_or_else(|| estimate(train_source.len()));

    state.valid_iteration_counts = valid_sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            pending
                .valid_iteration_counts
                .as_ref()
                .and_then(|counts| counts.get(i).copied())
                .unwrap_or_else(|| estimate(source.len()))
        })
        .collect();

    debug!(
        train = state.train_iteration_count,
        valid = ?state.valid_iteration_counts,
        "Worker iteration counters seeded"
    );
}

async fn prepare_checkpoint_dir(dir: &Path, config: &JobConfig) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let storage = LocalStorage::new(dir);
    json::write_pretty(&storage, "config.json", config.raw()).await?;
    debug!(dir = %dir.display(), "Configuration saved to checkpoint directory");
    Ok(())
}

fn construct_sources(
    specs: &[ComponentSpec],
    registry: &ComponentRegistry,
) -> Result<Vec<Box<dyn DataSource>>> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            registry
                .data_sources
                .construct(&format!("valid_data_loaders[{}]", i), spec, ())
        })
        .collect()
}

fn build_validation_sources(
    config: &JobConfig,
    registry: &ComponentRegistry,
    train_source: &mut dyn DataSource,
) -> Result<Vec<Box<dyn DataSource>>> {
    let sources = match &config.valid_data_loaders {
        Some(specs) => construct_sources(specs, registry)?,
        None => match train_source.split_validation() {
            Some(split) => vec![split],
            None => {
                info!("No validation data source configured, validation is skipped");
                Vec::new()
            }
        },
    };

    for source in &sources {
        info!(source = %source.name(), batches = source.len(), "Validation data source ready");
    }
    Ok(sources)
}

fn build_losses(config: &JobConfig, registry: &ComponentRegistry) -> Result<Vec<LossTerm>> {
    config
        .losses
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let loss = registry
                .losses
                .construct(&format!("losses[{}]", i), &spec.component(), ())?;
            Ok(LossTerm::new(spec.key(), spec.weight, loss))
        })
        .collect()
}
