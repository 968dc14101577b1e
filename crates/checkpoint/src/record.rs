//! Checkpoint record

use runtime_core::{Epoch, OptimizerState, Result, StateDict, Step, TrainingHistory};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of a training job sufficient to resume it.
///
/// The configuration that produced the job is embedded so a later run can
/// compare it against its own before restoring anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Last completed epoch
    pub epoch: Epoch,

    /// Best monitored value at save time
    pub monitor_best: f64,

    /// Architecture type tag (`config.arch.type`)
    pub arch: String,

    /// Optimizer type tag (`config.optimizer.type`)
    pub optimizer_type: String,

    /// Model weights
    pub state_dict: StateDict,

    pub optimizer_state: OptimizerState,

    /// Trainer iteration count. Absent in records that predate per-worker
    /// counters; resume derives an estimate instead.
    pub train_iteration_count: Option<Step>,

    /// Validator iteration counts, in validation-source order
    pub valid_iteration_counts: Option<Vec<Step>>,

    /// Producing configuration, as JSON text
    config: String,

    /// Per-epoch history of the run
    pub logger_history: TrainingHistory,
}

impl CheckpointRecord {
    pub fn new(
        epoch: Epoch,
        monitor_best: f64,
        state_dict: StateDict,
        optimizer_state: OptimizerState,
        config: &Value,
        logger_history: TrainingHistory,
    ) -> Self {
        Self {
            epoch,
            monitor_best,
            arch: type_tag(config, "arch"),
            optimizer_type: type_tag(config, "optimizer"),
            state_dict,
            optimizer_state,
            train_iteration_count: None,
            valid_iteration_counts: None,
            config: config.to_string(),
            logger_history,
        }
    }

    /// Record explicit per-worker iteration counters
    pub fn with_iteration_counts(mut self, train: Step, valid: Vec<Step>) -> Self {
        self.train_iteration_count = Some(train);
        self.valid_iteration_counts = Some(valid);
        self
    }

    /// The embedded configuration document
    pub fn config(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.config)?)
    }
}

fn type_tag(config: &Value, section: &str) -> String {
    config[section]["type"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_from_config() {
        let config = json!({
            "arch": { "type": "Linear", "args": { "in_features": 2 } },
            "optimizer": { "type": "Adam", "args": { "lr": 0.001 } }
        });
        let record = CheckpointRecord::new(
            3,
            0.5,
            StateDict::new(),
            OptimizerState::default(),
            &config,
            TrainingHistory::default(),
        );

        assert_eq!(record.arch, "Linear");
        assert_eq!(record.optimizer_type, "Adam");
        assert_eq!(record.config().unwrap(), config);
        assert!(record.train_iteration_count.is_none());

        let record = record.with_iteration_counts(30, vec![5, 7]);
        assert_eq!(record.train_iteration_count, Some(30));
        assert_eq!(record.valid_iteration_counts, Some(vec![5, 7]));
    }
}
