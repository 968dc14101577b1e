//! Scalar metrics writer
//!
//! Scalars are buffered in memory and appended to `scalars.jsonl` in the
//! writer directory on [`MetricsWriter::flush`], one JSON object per line.
//! A disabled writer accepts every call and writes nothing.

use chrono::{DateTime, Utc};
use runtime_core::{Result, Step};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// File the writer appends to
pub const SCALARS_FILE: &str = "scalars.jsonl";

/// One scalar observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub step: Step,
    pub mode: String,
    pub tag: String,
    pub value: f64,
    pub wall_time: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MetricsWriter {
    /// `None` when disabled
    path: Option<PathBuf>,
    step: Step,
    mode: String,
    pending: Vec<ScalarRecord>,
    written: u64,
}

impl MetricsWriter {
    /// Writer appending to `{dir}/scalars.jsonl`; the directory is created
    pub async fn create(dir: &Path, enabled: bool) -> Result<Self> {
        if !enabled {
            warn!("Visualization writer is disabled, scalars will not be recorded");
            return Ok(Self::disabled());
        }

        fs::create_dir_all(dir).await?;
        let path = dir.join(SCALARS_FILE);
        debug!(path = %path.display(), "Metrics writer ready");

        Ok(Self {
            path: Some(path),
            ..Self::disabled()
        })
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            step: 0,
            mode: "train".to_string(),
            pending: Vec::new(),
            written: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Set the global step and mode subsequent scalars are tagged with
    pub fn set_step(&mut self, step: Step, mode: &str) {
        self.step = step;
        if self.mode != mode {
            self.mode = mode.to_string();
        }
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64) {
        if self.path.is_none() {
            return;
        }
        self.pending.push(ScalarRecord {
            step: self.step,
            mode: self.mode.clone(),
            tag: tag.to_string(),
            value,
            wall_time: Utc::now(),
        });
    }

    /// Append buffered scalars to disk
    pub async fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in &self.pending {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        self.written += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Scalars flushed so far
    pub fn written(&self) -> u64 {
        self.written
    }
}
