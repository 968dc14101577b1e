//! Deterministic synthetic regression data
//!
//! Samples are generated once from a seeded ChaCha stream: a hidden weight
//! vector and bias, inputs uniform in `[-1, 1)`, targets `w . x + b` plus
//! uniform noise. Shuffling is reproducible per epoch.

use crate::traits::{Batch, DataSource};
use crate::Args;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use runtime_core::{Epoch, Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Name given to the source produced by [`DataSource::split_validation`]
pub const VALIDATION_SOURCE_NAME: &str = "valid";

#[derive(Debug, Deserialize)]
struct SyntheticArgs {
    n_samples: usize,
    batch_size: usize,
    in_features: usize,
    #[serde(default)]
    noise: f32,
    #[serde(default)]
    seed: u64,
    /// Fraction of samples in `(0, 1)`, or an absolute count when `>= 1`
    #[serde(default)]
    validation_split: f64,
    #[serde(default)]
    shuffle: bool,
    #[serde(default = "default_name")]
    name: String,
}

fn default_name() -> String {
    "train".to_string()
}

#[derive(Debug, Clone)]
struct Sample {
    id: u64,
    input: Vec<f32>,
    target: f32,
}

/// In-memory regression data source
#[derive(Debug, Clone)]
pub struct SyntheticRegression {
    name: String,
    samples: Arc<Vec<Sample>>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    validation_split: f64,
}

impl SyntheticRegression {
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub fn generate(
        name: impl Into<String>,
        n_samples: usize,
        batch_size: usize,
        in_features: usize,
        noise: f32,
        seed: u64,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be non-zero");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weight: Vec<f32> = (0..in_features).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let bias: f32 = rng.gen_range(-1.0..1.0);

        let samples = (0..n_samples as u64)
            .map(|id| {
                let input: Vec<f32> = (0..in_features).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let clean: f32 = input.iter().zip(&weight).map(|(x, w)| x * w).sum::<f32>() + bias;
                let jitter = if noise > 0.0 {
                    rng.gen_range(-noise..noise)
                } else {
                    0.0
                };
                Sample {
                    id,
                    input,
                    target: clean + jitter,
                }
            })
            .collect();

        Self {
            name: name.into(),
            samples: Arc::new(samples),
            batch_size,
            shuffle: false,
            seed,
            validation_split: 0.0,
        }
    }

    pub fn from_args(args: Args<'_>, _: ()) -> Result<Box<dyn DataSource>> {
        let section = args.section();
        let args: SyntheticArgs = args.parse()?;
        if args.batch_size == 0 {
            return Err(Error::resolution(section, "batch_size must be at least 1"));
        }
        let mut source = Self::generate(
            args.name,
            args.n_samples,
            args.batch_size,
            args.in_features,
            args.noise,
            args.seed,
        );
        source.shuffle = args.shuffle;
        source.validation_split = args.validation_split;
        Ok(Box::new(source))
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    fn n_validation(&self) -> usize {
        let split = self.validation_split;
        let n = if split <= 0.0 {
            0
        } else if split < 1.0 {
            (self.samples.len() as f64 * split).round() as usize
        } else {
            split as usize
        };
        n.min(self.samples.len())
    }

    fn epoch_order(&self, epoch: Epoch) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch.wrapping_mul(0x9E37_79B9)));
            order.shuffle(&mut rng);
        }
        order
    }
}

impl DataSource for SyntheticRegression {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    fn batches(&self, epoch: Epoch) -> Box<dyn Iterator<Item = Batch> + '_> {
        let order = self.epoch_order(epoch);
        let batch_size = self.batch_size;
        let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();

        Box::new(chunks.into_iter().map(move |indices| {
            let mut batch = Batch::default();
            for index in indices {
                let sample = &self.samples[index];
                batch.ids.push(sample.id);
                batch.inputs.push(sample.input.clone());
                batch.targets.push(sample.target);
            }
            batch
        }))
    }

    fn split_validation(&mut self) -> Option<Box<dyn DataSource>> {
        let n_valid = self.n_validation();
        if n_valid == 0 {
            return None;
        }

        // Fixed permutation so the split does not depend on the shuffle flag.
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed));
        let (valid_idx, train_idx) = order.split_at(n_valid);

        let pick = |indices: &[usize]| -> Arc<Vec<Sample>> {
            let mut picked: Vec<Sample> = indices.iter().map(|&i| self.samples[i].clone()).collect();
            picked.sort_by_key(|s| s.id);
            Arc::new(picked)
        };

        let valid = SyntheticRegression {
            name: VALIDATION_SOURCE_NAME.to_string(),
            samples: pick(valid_idx),
            batch_size: self.batch_size,
            shuffle: false,
            seed: self.seed,
            validation_split: 0.0,
        };
        self.samples = pick(train_idx);
        self.validation_split = 0.0;

        info!(
            source = %self.name,
            train_samples = self.samples.len(),
            valid_samples = valid.samples.len(),
            "Split validation data"
        );
        Some(Box::new(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_rounds_up() {
        let source = SyntheticRegression::generate("train", 10, 4, 2, 0.0, 1);
        assert_eq!(source.len(), 3);
        let sizes: Vec<usize> = source.batches(1).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = SyntheticRegression::generate("train", 16, 4, 3, 0.1, 7);
        let b = SyntheticRegression::generate("train", 16, 4, 3, 0.1, 7);
        let a: Vec<Batch> = a.batches(1).collect();
        let b: Vec<Batch> = b.batches(1).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shuffle_varies_by_epoch_only() {
        let source = SyntheticRegression::generate("train", 32, 32, 1, 0.0, 3).with_shuffle(true);
        let first: Vec<u64> = source.batches(1).flat_map(|b| b.ids).collect();
        let again: Vec<u64> = source.batches(1).flat_map(|b| b.ids).collect();
        let second: Vec<u64> = source.batches(2).flat_map(|b| b.ids).collect();
        assert_eq!(first, again);
        assert_ne!(first, second);
    }

    #[test]
    fn test_split_validation_fraction() {
        let mut source =
            SyntheticRegression::generate("train", 100, 10, 2, 0.0, 5).with_validation_split(0.2);
        let valid = source.split_validation().unwrap();

        assert_eq!(valid.name(), VALIDATION_SOURCE_NAME);
        assert_eq!(valid.len(), 2);
        assert_eq!(source.len(), 8);
        assert!(source.split_validation().is_none());

        let train_ids: Vec<u64> = source.batches(1).flat_map(|b| b.ids).collect();
        let valid_ids: Vec<u64> = valid.batches(1).flat_map(|b| b.ids).collect();
        assert!(valid_ids.iter().all(|id| !train_ids.contains(id)));
    }

    #[test]
    fn test_split_validation_absolute_count() {
        let mut source =
            SyntheticRegression::generate("train", 50, 5, 1, 0.0, 5).with_validation_split(15.0);
        let valid = source.split_validation().unwrap();
        assert_eq!(valid.len(), 3);
        assert_eq!(source.n_samples(), 35);
    }

    #[test]
    fn test_no_split_configured() {
        let mut source = SyntheticRegression::generate("train", 50, 5, 1, 0.0, 5);
        assert!(source.split_validation().is_none());
        assert_eq!(source.n_samples(), 50);
    }
}
