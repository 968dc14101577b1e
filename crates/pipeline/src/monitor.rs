//! Best-metric tracking and early stopping

use runtime_core::{EpochLog, MonitorMode};
use tracing::warn;

/// Result of observing one epoch log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Improved,
    NotImproved,
    /// Monitoring is off or was disabled by a missing key
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Monitor {
    key: String,
    mode: MonitorMode,
    best: f64,
    enabled: bool,
    early_stop: Option<u64>,
    not_improved: u64,
}

impl Monitor {
    /// Track `key` under `mode`, starting from `best`
    pub fn new(key: impl Into<String>, mode: MonitorMode, best: f64, early_stop: Option<u64>) -> Self {
        Self {
            key: key.into(),
            mode,
            best,
            enabled: mode != MonitorMode::Off,
            early_stop,
            not_improved: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compare the monitored value of `log` against the best so far.
    ///
    /// A log without the monitored key disables monitoring for good.
    pub fn observe(&mut self, log: &EpochLog) -> MonitorOutcome {
        if !self.enabled {
            return MonitorOutcome::Disabled;
        }

        let Some(value) = log.get(&self.key) else {
            warn!(
                metric = %self.key,
                epoch = log.epoch,
                "Metric is not found, model performance monitoring is disabled"
            );
            self.enabled = false;
            return MonitorOutcome::Disabled;
        };

        if self.mode.improves(value, self.best) {
            self.best = value;
            self.not_improved = 0;
            MonitorOutcome::Improved
        } else {
            self.not_improved += 1;
            MonitorOutcome::NotImproved
        }
    }

    /// Epochs in a row without improvement
    pub fn epochs_without_improvement(&self) -> u64 {
        self.not_improved
    }

    pub fn should_stop(&self) -> bool {
        match self.early_stop {
            Some(patience) => self.enabled && self.not_improved >= patience,
            None => false,
        }
    }
}
