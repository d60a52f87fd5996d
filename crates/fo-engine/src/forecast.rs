//! Toy per-partition forecasters used by the `fanout` binary and as an
//! end-to-end workload in tests.

use anyhow::{anyhow, bail, Context};
use fo_data::PartitionSource;
use fo_types::{Metrics, ParameterSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::unit::{Trainable, TrialContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastModel {
    /// Repeat the last observation.
    Naive,
    /// Repeat the last full season.
    SeasonalNaive,
    /// Predict the training mean.
    Mean,
}

impl ForecastModel {
    pub const ALL: [ForecastModel; 3] = [Self::Naive, Self::SeasonalNaive, Self::Mean];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::SeasonalNaive => "seasonal_naive",
            Self::Mean => "mean",
        }
    }

    pub fn forecast(self, train: &[f64], horizon: usize, season: usize) -> anyhow::Result<Vec<f64>> {
        let Some(&last) = train.last() else {
            bail!("cannot forecast from an empty series");
        };

        let predictions = match self {
            Self::Naive => vec![last; horizon],
            Self::Mean => {
                let mean = train.iter().sum::<f64>() / train.len() as f64;
                vec![mean; horizon]
            }
            Self::SeasonalNaive => {
                if season == 0 || train.len() < season {
                    bail!(
                        "seasonal_naive needs at least one season ({season}) of history, got {}",
                        train.len()
                    );
                }
                let last_season = &train[train.len() - season..];
                (0..horizon).map(|h| last_season[h % season]).collect()
            }
        };
        Ok(predictions)
    }
}

impl fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown forecast model '{s}'"))
    }
}

/// Fits one [`ForecastModel`] on one partition's series, scores it on the
/// held-out tail and reports `mse` and `mae`.
pub struct ForecastTrainable {
    source: Arc<dyn PartitionSource>,
    horizon: usize,
    season: usize,
    partition_param: String,
    model_param: String,
}

impl ForecastTrainable {
    pub fn new(source: Arc<dyn PartitionSource>) -> Self {
        Self {
            source,
            horizon: 14,
            season: 7,
            partition_param: "partition".to_string(),
            model_param: "model".to_string(),
        }
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_season(mut self, season: usize) -> Self {
        self.season = season;
        self
    }

    pub fn with_params(mut self, partition_param: &str, model_param: &str) -> Self {
        self.partition_param = partition_param.to_string();
        self.model_param = model_param.to_string();
        self
    }
}

impl Trainable for ForecastTrainable {
    fn train(&self, ctx: &TrialContext, params: &ParameterSet) -> anyhow::Result<Metrics> {
        let partition = params
            .get(&self.partition_param)
            .with_context(|| format!("missing parameter '{}'", self.partition_param))?
            .as_label();
        let model: ForecastModel = params
            .get(&self.model_param)
            .with_context(|| format!("missing parameter '{}'", self.model_param))?
            .as_label()
            .parse()?;

        let series = self
            .source
            .load(&partition)
            .with_context(|| format!("loading partition '{partition}' from {}", self.source.name()))?;
        if ctx.is_cancelled() {
            bail!("cancelled after loading partition '{partition}'");
        }

        let (train, holdout) = series.split_holdout(self.horizon).ok_or_else(|| {
            anyhow!(
                "partition '{partition}' has {} points, need more than the horizon of {}",
                series.len(),
                self.horizon
            )
        })?;
        let predictions = model.forecast(train, holdout.len(), self.season)?;

        let n = holdout.len() as f64;
        let (sq, abs) = holdout
            .iter()
            .zip(&predictions)
            .fold((0.0, 0.0), |(sq, abs), (actual, predicted)| {
                let err = actual - predicted;
                (sq + err * err, abs + err.abs())
            });

        debug!(partition = %partition, model = %model, trial = ctx.trial_number, "scored forecast");
        Ok(Metrics::from([
            ("mse".to_string(), sq / n),
            ("mae".to_string(), abs / n),
        ]))
    }

    fn name(&self) -> &str {
        "forecast"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{CancelToken, TrialUnit};
    use fo_data::{InMemorySource, Series};
    use fo_types::{ParameterValue, ResourceRequest};

    fn trainable() -> ForecastTrainable {
        let source = InMemorySource::new();
        source.insert(Series::new("p1", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        source.insert(Series::new("short", vec![1.0]));
        ForecastTrainable::new(Arc::new(source))
            .with_horizon(2)
            .with_season(2)
    }

    fn fit(trainable: ForecastTrainable, partition: &str, model: &str) -> anyhow::Result<Metrics> {
        let params = ParameterSet::from([
            ("partition".to_string(), ParameterValue::from(partition)),
            ("model".to_string(), ParameterValue::from(model)),
        ]);
        let trainable: Arc<dyn Trainable> = Arc::new(trainable);
        let unit = TrialUnit::new(0, params.clone(), ResourceRequest::cpus(1.0), Arc::clone(&trainable));
        let ctx = TrialContext::new(&unit, "test", CancelToken::new());
        trainable.train(&ctx, &params)
    }

    #[test]
    fn naive_repeats_last_value() {
        let metrics = fit(trainable(), "p1", "naive").unwrap();
        assert_eq!(metrics["mse"], 2.5);
        assert_eq!(metrics["mae"], 1.5);
    }

    #[test]
    fn mean_predicts_training_average() {
        let metrics = fit(trainable(), "p1", "mean").unwrap();
        assert_eq!(metrics["mse"], 9.25);
        assert_eq!(metrics["mae"], 3.0);
    }

    #[test]
    fn seasonal_naive_repeats_last_season() {
        let metrics = fit(trainable(), "p1", "seasonal_naive").unwrap();
        assert_eq!(metrics["mse"], 4.0);
        assert_eq!(metrics["mae"], 2.0);
    }

    #[test]
    fn unknown_model_raises() {
        let err = fit(trainable(), "p1", "prophet").unwrap_err();
        assert!(err.to_string().contains("prophet"));
    }

    #[test]
    fn missing_partition_and_short_series_raise() {
        assert!(fit(trainable(), "nowhere", "naive").is_err());
        assert!(fit(trainable(), "short", "naive").is_err());
    }

    #[test]
    fn model_names_parse() {
        for model in ForecastModel::ALL {
            assert_eq!(model.as_str().parse::<ForecastModel>().unwrap(), model);
        }
    }
}
