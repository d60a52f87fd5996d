use dashmap::DashMap;
use fo_types::{DataError, FoResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A univariate series belonging to one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub partition: String,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(partition: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            partition: partition.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Split into (train, holdout) with `horizon` trailing points held out.
    pub fn split_holdout(&self, horizon: usize) -> Option<(&[f64], &[f64])> {
        if horizon == 0 || horizon >= self.values.len() {
            return None;
        }
        Some(self.values.split_at(self.values.len() - horizon))
    }
}

/// Loads the data for one partition. Implementations must be shareable
/// across worker threads.
pub trait PartitionSource: Send + Sync {
    fn load(&self, partition: &str) -> FoResult<Series>;

    fn name(&self) -> &str;
}

/// Partitions held in memory, e.g. preloaded by the caller.
#[derive(Debug, Default)]
pub struct InMemorySource {
    series: DashMap<String, Series>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, series: Series) {
        self.series.insert(series.partition.clone(), series);
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PartitionSource for InMemorySource {
    fn load(&self, partition: &str) -> FoResult<Series> {
        self.series
            .get(partition)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DataError::PartitionNotFound {
                    partition: partition.to_string(),
                }
                .into()
            })
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// Deterministic synthetic series: a seasonal random walk seeded from the
/// partition id, so the same id always yields the same data.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    length: usize,
    season: usize,
    seed: u64,
}

impl SyntheticSource {
    pub fn new(length: usize, season: usize) -> Self {
        Self {
            length,
            season: season.max(1),
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn partition_seed(&self, partition: &str) -> u64 {
        // FNV-1a; stable across platforms and releases.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in partition.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash ^ self.seed
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(120, 7)
    }
}

impl PartitionSource for SyntheticSource {
    fn load(&self, partition: &str) -> FoResult<Series> {
        let mut rng = StdRng::seed_from_u64(self.partition_seed(partition));
        let amplitude: f64 = rng.random_range(0.0..10.0);
        let drift: f64 = rng.random_range(-0.2..0.2);
        let mut level: f64 = rng.random_range(50.0..150.0);

        let values = (0..self.length)
            .map(|t| {
                level += drift + (rng.random::<f64>() - 0.5) * 2.0;
                let phase = (t % self.season) as f64 / self.season as f64;
                level + amplitude * (phase * std::f64::consts::TAU).sin()
            })
            .collect();

        Ok(Series::new(partition, values))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
