//! Sweep configuration.

use chrono::{DateTime, Utc};
use fo_types::{ConfigError, FoResult, ResourceRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::search::SearchSpace;

/// Unique sweep run identifier.
pub type SweepId = Uuid;

/// Whether the objective metric should be minimized or maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    #[default]
    Minimize,
    Maximize,
}

impl ObjectiveDirection {
    /// Whether `candidate` strictly beats `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }
}

/// Top-level configuration for a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub id: SweepId,
    pub name: String,
    pub description: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Maximum number of trials; `None` runs the whole grid.
    pub requested_trials: Option<usize>,

    /// Resources every trial asks for.
    pub resources_per_trial: ResourceRequest,

    /// Total resources of the worker pool.
    pub capacity: ResourceRequest,

    /// Number of worker threads.
    pub workers: usize,

    /// Per-trial wall clock limit.
    pub trial_timeout_secs: Option<u64>,

    /// Extra attempts for trials that raise or panic. Zero disables retries.
    pub max_retries: u32,

    /// Metric name to select on (e.g. "mse").
    pub objective_metric: String,

    pub direction: ObjectiveDirection,

    /// Parameter whose value groups trials for best-of selection.
    pub group_by: String,

    /// Parameter that names the winner within a group.
    pub label_field: String,

    pub created_at: DateTime<Utc>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "sweep".to_string(),
            description: String::new(),
            search_space: SearchSpace::new(),
            requested_trials: None,
            resources_per_trial: ResourceRequest::cpus(1.0),
            capacity: ResourceRequest::cpus(4.0),
            workers: 4,
            trial_timeout_secs: None,
            max_retries: 0,
            objective_metric: "mse".to_string(),
            direction: ObjectiveDirection::Minimize,
            group_by: "partition".to_string(),
            label_field: "model".to_string(),
            created_at: Utc::now(),
        }
    }
}

impl SweepConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            name: name.into(),
            search_space,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FoResult<Self> {
        let path = path.as_ref();
        info!("Loading sweep configuration from: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn with_requested_trials(mut self, n: usize) -> Self {
        self.requested_trials = Some(n);
        self
    }

    pub fn with_resources(mut self, per_trial: ResourceRequest, capacity: ResourceRequest) -> Self {
        self.resources_per_trial = per_trial;
        self.capacity = capacity;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.trial_timeout_secs = Some(secs);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective_metric = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_grouping(mut self, group_by: &str, label_field: &str) -> Self {
        self.group_by = group_by.to_string();
        self.label_field = label_field.to_string();
        self
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs.map(Duration::from_secs)
    }

    /// Reject configurations that could never run to completion.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search_space.validate()?;
        self.resources_per_trial.validate()?;
        self.capacity.validate()?;

        if self.requested_trials == Some(0) {
            return Err(ConfigError::ZeroTrials);
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "workers must be at least 1".to_string(),
            });
        }
        if self.objective_metric.is_empty() {
            return Err(ConfigError::Invalid {
                message: "objective metric must be named".to_string(),
            });
        }
        for field in [&self.group_by, &self.label_field] {
            if self.search_space.get(field).is_none() {
                return Err(ConfigError::Invalid {
                    message: format!("'{field}' is not a parameter of the search space"),
                });
            }
        }
        if !self.resources_per_trial.fits_within(&self.capacity) {
            return Err(ConfigError::UnsatisfiableRequest {
                request: self.resources_per_trial.to_string(),
                capacity: self.capacity.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SweepConfig {
        let space = SearchSpace::new()
            .add_grid("partition", ["a", "b"])
            .add_grid("model", ["naive", "mean"]);

        SweepConfig::new("test_sweep", space)
            .with_requested_trials(4)
            .with_workers(2)
            .with_objective("mae", ObjectiveDirection::Minimize)
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(sample_config().validate(), Ok(()));
    }

    #[test]
    fn request_larger_than_capacity_is_rejected() {
        let config = sample_config()
            .with_resources(ResourceRequest::cpus(8.0), ResourceRequest::cpus(4.0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsatisfiableRequest { .. })
        ));
    }

    #[test]
    fn unknown_group_parameter_is_rejected() {
        let config = sample_config().with_grouping("store", "model");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = sample_config().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn direction_comparisons() {
        assert!(ObjectiveDirection::Minimize.improves(3.2, 5.0));
        assert!(!ObjectiveDirection::Minimize.improves(5.0, 5.0));
        assert!(ObjectiveDirection::Maximize.improves(5.0, 3.2));
    }

    #[test]
    fn partial_json_takes_defaults() {
        let json = r#"{
            "name": "stores",
            "search_space": {"parameters": [
                {"name": "partition", "kind": {"grid": {"values": ["s1", "s2"]}}},
                {"name": "model", "kind": {"grid": {"values": ["naive"]}}}
            ]},
            "resources_per_trial": {"cpu": 2.0},
            "direction": "maximize"
        }"#;
        let config: SweepConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "stores");
        assert_eq!(config.direction, ObjectiveDirection::Maximize);
        assert_eq!(config.resources_per_trial.get("cpu"), 2.0);
        assert_eq!(config.workers, 4);
        assert_eq!(config.validate(), Ok(()));
    }
}
