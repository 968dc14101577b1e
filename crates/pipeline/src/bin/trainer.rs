//! Training job entry point
//!
//! Usage: trainer --config config.json [--resume ckpt] [--mode test ...]

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use components::ComponentRegistry;
use pipeline::{ManagerOptions, PipelineManager, RunMode, RunSummary};
use runtime_core::JobConfig;

#[derive(Parser)]
#[command(author, version, about = "Run a configured model training job", long_about = None)]
struct Cli {
    /// Job configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Checkpoint to resume training from
    #[arg(short, long, value_name = "CKPT")]
    resume: Option<PathBuf>,

    /// Checkpoint whose weights initialize the model
    #[arg(short, long, value_name = "CKPT")]
    pretrained: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = RunMode::Train)]
    mode: RunMode,

    /// Directory for inference results in test mode
    #[arg(short, long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Skip data sources whose inference results already exist
    #[arg(long)]
    skip_exists: bool,

    /// Number of visible accelerators, overriding CUDA_VISIBLE_DEVICES
    #[arg(short, long, env = "TRAINER_DEVICES")]
    devices: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trainer=info,pipeline=info,checkpoint=info,components=info,runtime_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let text = tokio::fs::read_to_string(&cli.config).await?;
    let config = JobConfig::from_json_str(&text)?;
    tracing::info!(name = %config.name, config = %cli.config.display(), "Loaded job configuration");

    let options = ManagerOptions {
        mode: cli.mode,
        resume: cli.resume,
        pretrained: cli.pretrained,
        save_dir: cli.save_dir,
        skip_exists: cli.skip_exists,
        available_devices: cli.devices,
    };

    let registry = ComponentRegistry::with_builtins();
    let mut manager = PipelineManager::setup(config, options, &registry).await?;

    match manager.run().await? {
        RunSummary::Training(summary) => tracing::info!(
            epochs_run = summary.epochs_run,
            monitor_best = summary.monitor_best,
            stopped_early = summary.stopped_early,
            checkpoint_dir = %manager.checkpoint_dir().display(),
            "Training job finished"
        ),
        RunSummary::Testing(summary) => tracing::info!(
            written = summary.written.len(),
            skipped = summary.skipped.len(),
            "Testing job finished"
        ),
    }

    Ok(())
}
