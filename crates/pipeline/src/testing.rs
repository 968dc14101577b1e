//! Inference over every configured data source, results persisted as JSON

use components::{DataSource, Metric, Model};
use runtime_core::{DeviceAssignment, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use storage::{json, LocalStorage, StorageBackend};
use tracing::{info, warn};

/// Inference output of one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResults {
    pub source: String,
    pub ids: Vec<u64>,
    pub outputs: Tensor,
    pub targets: Tensor,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestingSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

pub struct TestingPipeline {
    model: Box<dyn Model>,
    devices: DeviceAssignment,
    sources: Vec<Box<dyn DataSource>>,
    metrics: Vec<Box<dyn Metric>>,
    storage: LocalStorage,
    skip_exists: bool,
}

impl TestingPipeline {
    /// Results of source `name` are written to `{output_dir}/{name}.json`
    pub fn new(
        model: Box<dyn Model>,
        devices: DeviceAssignment,
        sources: Vec<Box<dyn DataSource>>,
        output_dir: impl Into<PathBuf>,
        skip_exists: bool,
    ) -> Self {
        Self {
            model,
            devices,
            sources,
            metrics: Vec::new(),
            storage: LocalStorage::new(output_dir.into()),
            skip_exists,
        }
    }

    pub fn attach_metrics(&mut self, metrics: Vec<Box<dyn Metric>>) {
        self.metrics = metrics;
    }

    pub fn metrics(&self) -> &[Box<dyn Metric>] {
        &self.metrics
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> + '_ {
        self.sources.iter().map(|s| s.name())
    }

    pub fn output_dir(&self) -> &std::path::Path {
        self.storage.root()
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn result_key(source: &str) -> String {
        format!("{}.json", source)
    }

    /// Run inference once over each source. Weights are never updated.
    pub async fn run(&mut self) -> Result<TestingSummary> {
        let mut summary = TestingSummary::default();
        info!(device = %self.devices.device, sources = self.sources.len(), "Testing started");

        for source in &self.sources {
            let key = Self::result_key(source.name());
            let path = self.storage.path_of(&key);

            if self.skip_exists && self.storage.exists(&key).await? {
                warn!(path = %path.display(), "Skipping inference, results already exist");
                summary.skipped.push(path);
                continue;
            }

            let results = self.infer(source.as_ref());
            info!(
                source = %results.source,
                samples = results.ids.len(),
                path = %path.display(),
                "Saving inference results"
            );
            json::write_pretty(&self.storage, &key, &results).await?;
            summary.written.push(path);
        }

        Ok(summary)
    }

    fn infer(&self, source: &dyn DataSource) -> InferenceResults {
        let mut results = InferenceResults {
            source: source.name().to_string(),
            ids: Vec::new(),
            outputs: Vec::new(),
            targets: Vec::new(),
            metrics: BTreeMap::new(),
        };

        for batch in source.batches(1) {
            let outputs = self.model.forward(&batch);
            results.ids.extend_from_slice(&batch.ids);
            results.outputs.extend(outputs);
            results.targets.extend_from_slice(&batch.targets);
        }

        for metric in &self.metrics {
            let value = metric.compute(&results.outputs, &results.targets);
            results.metrics.insert(metric.name().to_string(), value);
        }
        results
    }
}
