//! Checkpoint resume and inference across separate jobs
//!
//! Each scenario runs a first job, then sets up a second one from its
//! checkpoints the way a restarted process would.

use anyhow::Result;
use checkpoint::CheckpointStore;
use components::ComponentRegistry;
use pipeline::{ManagerOptions, PipelineManager, RunMode, RunSummary, SetupStage};
use runtime_core::{Error, JobConfig, SetupWarning};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn job(save_dir: &Path, epochs: u64) -> Value {
    json!({
        "name": "resume",
        "n_gpu": 1,
        "arch": { "type": "Linear", "args": { "in_features": 3 } },
        "data_loader": {
            "type": "SyntheticRegression",
            "args": {
                "n_samples": 200,
                "batch_size": 20,
                "in_features": 3,
                "seed": 5,
                "validation_split": 0.2
            }
        },
        "optimizer": { "type": "Adam", "args": { "lr": 0.05 } },
        "lr_scheduler": { "type": "ConstantLr" },
        "losses": [ { "type": "MseLoss", "weight": 1.0, "nickname": "mse" } ],
        "metrics": [ { "type": "MeanAbsoluteError" } ],
        "trainer": {
            "epochs": epochs,
            "save_freq": 1,
            "monitor": "valid_loss",
            "monitor_mode": "min",
            "save_dir": save_dir
        }
    })
}

fn options() -> ManagerOptions {
    ManagerOptions {
        available_devices: Some(1),
        ..Default::default()
    }
}

/// Run a two-epoch job and return the path of its second checkpoint
async fn first_run(root: &Path) -> Result<PathBuf> {
    let config = JobConfig::from_value(job(&root.join("first"), 2))?;
    let mut manager = PipelineManager::setup(config, options(), &ComponentRegistry::default()).await?;
    manager.run().await?;
    Ok(manager.checkpoint_dir().join("checkpoint-epoch2.ckpt"))
}

#[tokio::test]
async fn test_resume_continues_from_next_epoch() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let checkpoint = first_run(temp_dir.path()).await?;
    let saved = CheckpointStore::load(&checkpoint).await?;

    let config = JobConfig::from_value(job(&temp_dir.path().join("second"), 4))?;
    let options = ManagerOptions {
        resume: Some(checkpoint),
        ..options()
    };
    let mut manager = PipelineManager::setup(config, options, &ComponentRegistry::default()).await?;

    assert!(manager.warnings().is_empty());
    assert_eq!(manager.stages()[2], SetupStage::CheckpointResumed);
    {
        let training = manager.pipeline().as_training().expect("training pipeline");
        assert_eq!(training.state().start_epoch, 3);
        assert_eq!(training.state().train_iteration_count, 16);
        assert_eq!(training.state().valid_iteration_counts, vec![4]);
        assert_eq!(training.optimizer().state(), saved.optimizer_state);
        assert_eq!(training.model().state_dict(), saved.state_dict);
    }

    let summary = match manager.run().await? {
        RunSummary::Training(summary) => summary,
        other => panic!("unexpected summary: {other:?}"),
    };
    assert_eq!(summary.epochs_run, 2);
    assert_eq!(summary.last_epoch, Some(4));

    let training = manager.pipeline().as_training().expect("training pipeline");
    let epochs: Vec<u64> = training.state().history.entries.iter().map(|log| log.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3, 4]);
    assert!(summary.monitor_best <= saved.monitor_best);

    let last = CheckpointStore::load(&manager.checkpoint_dir().join("checkpoint-epoch4.ckpt")).await?;
    assert_eq!(last.train_iteration_count, Some(32));
    assert_eq!(last.optimizer_state.step, 32);
    Ok(())
}

#[tokio::test]
async fn test_resume_with_new_optimizer_starts_fresh() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let checkpoint = first_run(temp_dir.path()).await?;

    let mut value = job(&temp_dir.path().join("second"), 3);
    value["optimizer"] = json!({ "type": "Sgd", "args": { "lr": 0.01 } });
    let options = ManagerOptions {
        resume: Some(checkpoint),
        ..options()
    };
    let manager =
        PipelineManager::setup(JobConfig::from_value(value)?, options, &ComponentRegistry::default())
            .await?;

    assert_eq!(
        manager.warnings(),
        &[SetupWarning::OptimizerMismatch {
            checkpoint: "Adam".to_string(),
            live: "Sgd".to_string(),
        }]
    );
    let state = manager
        .pipeline()
        .as_training()
        .expect("training pipeline")
        .optimizer()
        .state();
    assert_eq!(state.kind, "Sgd");
    assert_eq!(state.step, 0);
    assert_eq!(state.learning_rate, 0.01);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_checkpoint_aborts_setup() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let checkpoint = first_run(temp_dir.path()).await?;
    let mut bytes = std::fs::read(&checkpoint)?;
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&checkpoint, bytes)?;

    let options = ManagerOptions {
        resume: Some(checkpoint),
        ..options()
    };
    let config = JobConfig::from_value(job(&temp_dir.path().join("second"), 3))?;
    let err = PipelineManager::setup(config, options, &ComponentRegistry::default())
        .await
        .err()
        .expect("setup must fail");

    assert!(matches!(err, Error::CheckpointCorrupted { .. }));
    assert!(err.is_fatal());
    Ok(())
}

#[tokio::test]
async fn test_inference_from_best_weights() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let checkpoint = first_run(temp_dir.path()).await?;
    let best = checkpoint.with_file_name("model_best.ckpt");
    let results_dir = temp_dir.path().join("results");

    let mut value = job(&temp_dir.path().join("test"), 1);
    value["valid_data_loaders"] = json!([{
        "type": "SyntheticRegression",
        "args": { "n_samples": 30, "batch_size": 10, "in_features": 3, "seed": 99, "name": "holdout" }
    }]);
    let options = ManagerOptions {
        mode: RunMode::Test,
        pretrained: Some(best),
        save_dir: Some(results_dir.clone()),
        skip_exists: true,
        ..options()
    };

    let config = JobConfig::from_value(value)?;
    let registry = ComponentRegistry::default();
    let mut manager = PipelineManager::setup(config.clone(), options.clone(), &registry).await?;
    match manager.run().await? {
        RunSummary::Testing(summary) => assert_eq!(summary.written.len(), 2),
        other => panic!("unexpected summary: {other:?}"),
    }

    let holdout: Value =
        serde_json::from_str(&std::fs::read_to_string(results_dir.join("holdout.json"))?)?;
    assert_eq!(holdout["ids"].as_array().map(Vec::len), Some(30));
    assert!(holdout["metrics"]["mean_absolute_error"].is_number());

    // Second invocation finds both result files and skips them
    let mut manager = PipelineManager::setup(config, options, &registry).await?;
    match manager.run().await? {
        RunSummary::Testing(summary) => {
            assert!(summary.written.is_empty());
            assert_eq!(summary.skipped.len(), 2);
        }
        other => panic!("unexpected summary: {other:?}"),
    }
    Ok(())
}
