//! End-to-end training job
//!
//! Drives a complete job through the public entry point:
//! - Setup from a JSON configuration with the builtin components
//! - Validation split taken from the training source
//! - Two epochs with a checkpoint after each
//! - Best-model tracking and scalar logging

use anyhow::Result;
use checkpoint::CheckpointStore;
use components::ComponentRegistry;
use pipeline::writer::{ScalarRecord, SCALARS_FILE};
use pipeline::{ManagerOptions, PipelineManager, RunSummary, Worker};
use runtime_core::JobConfig;
use serde_json::{json, Value};
use std::path::Path;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pipeline=debug,checkpoint=debug")
        .with_test_writer()
        .try_init();
}

/// 1100 samples with 100 held out: a training source of 100 batches and a
/// validation source of 10
fn job(save_dir: &Path) -> Value {
    json!({
        "name": "e2e",
        "n_gpu": 0,
        "arch": { "type": "Linear", "args": { "in_features": 4 } },
        "data_loader": {
            "type": "SyntheticRegression",
            "args": {
                "n_samples": 1100,
                "batch_size": 10,
                "in_features": 4,
                "noise": 0.05,
                "seed": 42,
                "shuffle": true,
                "validation_split": 100
            }
        },
        "optimizer": { "type": "Sgd", "args": { "lr": 0.05, "momentum": 0.5 } },
        "lr_scheduler": { "type": "StepLr", "args": { "step_size": 1, "gamma": 0.5 } },
        "losses": [ { "type": "MseLoss", "weight": 1.0 } ],
        "metrics": [ { "type": "MeanAbsoluteError" }, { "type": "MeanSquaredError" } ],
        "trainer": {
            "epochs": 2,
            "save_freq": 1,
            "monitor": "valid_loss",
            "monitor_mode": "min",
            "save_dir": save_dir
        }
    })
}

fn options() -> ManagerOptions {
    ManagerOptions {
        available_devices: Some(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_two_epoch_job() -> Result<()> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let config = JobConfig::from_value(job(temp_dir.path()))?;
    let registry = ComponentRegistry::with_builtins();

    let mut manager = PipelineManager::setup(config, options(), &registry).await?;

    {
        let training = manager.pipeline().as_training().expect("training pipeline");
        assert_eq!(training.trainer().source_len(), 100);
        assert_eq!(training.validators().len(), 1);
        assert_eq!(training.validators()[0].name(), "valid");
        assert_eq!(training.validators()[0].source_len(), 10);
    }

    let summary = match manager.run().await? {
        RunSummary::Training(summary) => summary,
        other => panic!("unexpected summary: {other:?}"),
    };
    assert_eq!(summary.epochs_run, 2);
    assert!(!summary.stopped_early);

    // Exactly two periodic checkpoints
    let mut epoch_files: Vec<String> = std::fs::read_dir(manager.checkpoint_dir())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("checkpoint-epoch"))
        .collect();
    epoch_files.sort();
    assert_eq!(epoch_files, vec!["checkpoint-epoch1.ckpt", "checkpoint-epoch2.ckpt"]);

    // Best is the better of the two observations
    let training = manager.pipeline().as_training().expect("training pipeline");
    let observed: Vec<f64> = training
        .state()
        .history
        .entries
        .iter()
        .map(|log| log.get("valid_loss").expect("valid_loss logged"))
        .collect();
    assert_eq!(observed.len(), 2);
    let best = observed[0].min(observed[1]);
    assert_eq!(summary.monitor_best, best);

    let best_record =
        CheckpointStore::load(&manager.checkpoint_dir().join("model_best.ckpt")).await?;
    assert_eq!(best_record.monitor_best, best);

    let last = CheckpointStore::load(&manager.checkpoint_dir().join("checkpoint-epoch2.ckpt")).await?;
    assert_eq!(last.train_iteration_count, Some(200));
    assert_eq!(last.valid_iteration_counts, Some(vec![20]));
    assert_eq!(last.state_dict, training.model().state_dict());
    assert_eq!(last.config()?, *manager.config().raw());

    // Learning rate halves each epoch
    let lrs: Vec<f64> = training
        .state()
        .history
        .entries
        .iter()
        .filter_map(|log| log.get("lr"))
        .collect();
    assert_eq!(lrs, vec![0.025, 0.0125]);

    Ok(())
}

#[tokio::test]
async fn test_scalars_and_provenance_written() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let mut value = job(&temp_dir.path().join("checkpoints"));
    value["trainer"]["epochs"] = json!(1);
    value["visualization"] = json!({ "log_dir": temp_dir.path().join("logs"), "tensorboardX": true });
    let config = JobConfig::from_value(value.clone())?;

    let mut manager = PipelineManager::setup(config, options(), &ComponentRegistry::default()).await?;
    manager.run().await?;

    assert!(manager.writer_dir().starts_with(temp_dir.path().join("logs").join("e2e")));

    let text = std::fs::read_to_string(manager.writer_dir().join(SCALARS_FILE))?;
    let records: Vec<ScalarRecord> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()?;
    assert!(records.iter().any(|r| r.mode == "train" && r.tag == "loss" && r.step == 100));
    assert!(records.iter().any(|r| r.mode == "valid" && r.tag == "mean_absolute_error"));
    assert!(records.iter().any(|r| r.tag == "lr"));

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(
        manager.checkpoint_dir().join("config.json"),
    )?)?;
    assert_eq!(saved, value);
    Ok(())
}

#[tokio::test]
async fn test_early_stop_on_plateau() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let mut value = job(temp_dir.path());
    value["trainer"]["epochs"] = json!(50);
    value["trainer"]["save_freq"] = json!(100);
    value["trainer"]["early_stop"] = json!(1);
    // With a zero learning rate nothing ever improves after epoch 1
    value["optimizer"] = json!({ "type": "Sgd", "args": { "lr": 0.0 } });
    let config = JobConfig::from_value(value)?;

    let mut manager = PipelineManager::setup(config, options(), &ComponentRegistry::default()).await?;
    let summary = match manager.run().await? {
        RunSummary::Training(summary) => summary,
        other => panic!("unexpected summary: {other:?}"),
    };

    assert!(summary.stopped_early);
    assert_eq!(summary.last_epoch, Some(2));
    assert!(summary.checkpoints.is_empty());
    assert!(summary.best_checkpoint.is_some());
    Ok(())
}
