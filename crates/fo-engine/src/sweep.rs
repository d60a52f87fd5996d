//! Submission surface: one call from a [`SweepConfig`] to a finished
//! [`SweepReport`].

use fo_optimizer::{param_key, select_best, GridSearch, SelectionReport, SweepConfig, SweepId};
use fo_types::{Diagnostic, DiagnosticKind, FoResult, TrialId, TrialOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::ResourceLedger;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, StatsSnapshot};
use crate::store::ResultStore;
use crate::unit::{units_from_bindings, Trainable, TrialUnit};

/// Marker printed for groups that ended without a winner.
pub const NO_SUCCESS_MARKER: &str = "NO SUCCESSFUL TRIAL";

/// Overall result of a sweep that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Every group has at least one successful trial.
    Success,
    /// At least one group has no successful trial.
    PartialFailure,
}

impl SweepStatus {
    /// Process exit code. Fatal errors, which produce no report, exit 1.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: SweepId,
    pub name: String,
    pub objective_metric: String,
    pub group_by: String,
    /// Every recorded outcome, in admission order.
    pub trials: Vec<TrialOutcome>,
    pub selection: SelectionReport,
    pub diagnostics: Vec<Diagnostic>,
    /// Trials cancelled before they were admitted.
    pub cancelled: Vec<TrialId>,
    pub stats: StatsSnapshot,
    pub status: SweepStatus,
}

pub struct Sweep {
    config: SweepConfig,
    trainable: Arc<dyn Trainable>,
}

impl Sweep {
    pub fn new(config: SweepConfig, trainable: Arc<dyn Trainable>) -> Self {
        Self { config, trainable }
    }

    /// Validate, expand and submit. Configuration problems surface here,
    /// before any trial runs.
    pub fn prepare(self) -> FoResult<PreparedSweep> {
        let config = self.config;
        config.validate()?;

        let expansion = GridSearch::expand(&config.search_space, config.requested_trials)?;
        info!(
            "Sweep '{}': {} trials from a grid of {}",
            config.name,
            expansion.bindings.len(),
            expansion.available
        );

        let units = units_from_bindings(expansion.bindings, &config.resources_per_trial, self.trainable);
        let mut seen = HashSet::new();
        let expected_groups: Vec<String> = units
            .iter()
            .filter_map(|u| u.params().get(&config.group_by).map(|v| v.as_label()))
            .filter(|g| seen.insert(g.clone()))
            .collect();

        let ledger = Arc::new(ResourceLedger::new(&config.capacity));
        let store = Arc::new(ResultStore::new());
        let scheduler_config = SchedulerConfig {
            workers: config.workers,
            trial_timeout: config.trial_timeout(),
            max_retries: config.max_retries,
        };
        let mut scheduler = Scheduler::new(Arc::clone(&ledger), Arc::clone(&store), scheduler_config);
        scheduler.submit(units)?;

        Ok(PreparedSweep {
            config,
            scheduler,
            store,
            ledger,
            expected_groups,
            diagnostics: expansion.diagnostics,
        })
    }

    pub fn run(self) -> FoResult<SweepReport> {
        self.prepare()?.run()
    }
}

/// A sweep whose trials are queued but not yet running.
pub struct PreparedSweep {
    config: SweepConfig,
    scheduler: Scheduler,
    store: Arc<ResultStore>,
    ledger: Arc<ResourceLedger>,
    expected_groups: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl PreparedSweep {
    /// Handle for cancelling or observing the run from another thread.
    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn trial_count(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// Queued units in submission order, e.g. to pick ids for cancellation.
    pub fn units(&self) -> impl Iterator<Item = &TrialUnit> {
        self.scheduler.pending_units()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn run(mut self) -> FoResult<SweepReport> {
        let summary = self.scheduler.run()?;
        let config = &self.config;
        let trials = self.store.all();

        let mut selection = select_best(
            &trials,
            param_key(&config.group_by),
            &config.objective_metric,
            &config.label_field,
            config.direction,
        );

        let mut diagnostics = std::mem::take(&mut self.diagnostics);
        diagnostics.append(&mut selection.diagnostics);

        // Groups whose every trial was cancelled before running have no outcome
        // at all. Unresolved groups keep submission order either way.
        let mut unresolved = Vec::with_capacity(selection.unresolved_groups.len());
        for group in &self.expected_groups {
            if selection.get(group).is_some() {
                continue;
            }
            if !selection.unresolved_groups.contains(group) {
                let diag = Diagnostic::new(DiagnosticKind::GroupHasNoSuccess {
                    group: group.clone(),
                    failed: 0,
                });
                warn!("{}", diag);
                diagnostics.push(diag);
            }
            unresolved.push(group.clone());
        }
        selection.unresolved_groups = unresolved;

        let status = if selection.is_complete() {
            SweepStatus::Success
        } else {
            SweepStatus::PartialFailure
        };
        debug_assert!(self.ledger.snapshot().is_idle());
        info!(
            "Sweep '{}' finished: {} trials, {} groups resolved, {} unresolved",
            config.name,
            trials.len(),
            selection.selections.len(),
            selection.unresolved_groups.len()
        );

        Ok(SweepReport {
            sweep_id: config.id,
            name: config.name.clone(),
            objective_metric: config.objective_metric.clone(),
            group_by: config.group_by.clone(),
            trials,
            selection,
            diagnostics,
            cancelled: summary.cancelled,
            stats: summary.stats,
            status,
        })
    }
}

impl SweepReport {
    pub fn to_json(&self) -> FoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text dump: one row per trial, then the winner of each group.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Sweep '{}' ({})", self.name, self.sweep_id);
        let _ = writeln!(
            out,
            "{:>6}  {:<36}  {:<9}  {:<20}  {}",
            "trial", "id", "status", self.group_by, "result"
        );

        for trial in &self.trials {
            let group = trial
                .param(&self.group_by)
                .map(|v| v.as_label())
                .unwrap_or_default();
            let result = match (trial.metrics(), trial.error()) {
                (Some(metrics), _) => metrics
                    .iter()
                    .map(|(name, value)| format!("{name}={value:.4}"))
                    .collect::<Vec<_>>()
                    .join(" "),
                (None, Some(error)) => error.to_string(),
                (None, None) => String::new(),
            };
            let status = if trial.is_success() { "succeeded" } else { "failed" };
            let _ = writeln!(
                out,
                "{:>6}  {:<36}  {:<9}  {:<20}  {}",
                trial.trial_number, trial.trial_id, status, group, result
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Best by {} ({}):", self.group_by, self.objective_metric);
        for best in &self.selection.selections {
            let _ = writeln!(
                out,
                "  {:<20}  {:<20}  {:.4}  (trial {})",
                best.group_key, best.winning_label, best.winning_metric, best.trial_number
            );
        }
        for group in &self.selection.unresolved_groups {
            let _ = writeln!(out, "  {:<20}  {}", group, NO_SUCCESS_MARKER);
        }

        for diag in &self.diagnostics {
            let _ = writeln!(out, "warning: {}", diag);
        }
        let _ = writeln!(
            out,
            "{} succeeded, {} failed, {} cancelled, peak {} running",
            self.stats.succeeded, self.stats.failed, self.stats.cancelled, self.stats.peak_running
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastTrainable;
    use crate::unit::TrialContext;
    use fo_data::SyntheticSource;
    use fo_optimizer::{ObjectiveDirection, SearchSpace};
    use fo_types::{ConfigError, FoError, Metrics, ParameterSet, ResourceRequest};

    fn partitions(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("store_{i}")).collect()
    }

    fn config(n: usize) -> SweepConfig {
        let space = SearchSpace::new()
            .add_grid("partition", partitions(n))
            .add_grid("model", ["naive", "seasonal_naive", "mean"]);
        SweepConfig::new("forecast", space).with_workers(4)
    }

    fn forecaster() -> Arc<dyn Trainable> {
        Arc::new(ForecastTrainable::new(Arc::new(SyntheticSource::default())))
    }

    #[test]
    fn forecast_sweep_selects_one_model_per_partition() {
        let report = Sweep::new(config(5), forecaster()).run().unwrap();

        assert_eq!(report.trials.len(), 15);
        assert_eq!(report.status, SweepStatus::Success);
        assert_eq!(report.selection.selections.len(), 5);
        assert_eq!(report.selection.selections[0].group_key, "store_0");
        for best in &report.selection.selections {
            let losing = report
                .trials
                .iter()
                .filter(|t| t.param("partition").map(|v| v.as_label()).as_deref() == Some(best.group_key.as_str()))
                .filter_map(|t| t.metric("mse"));
            for mse in losing {
                assert!(best.winning_metric <= mse);
            }
        }
    }

    #[test]
    fn same_inputs_give_same_selection() {
        let a = Sweep::new(config(6), forecaster()).run().unwrap();
        let b = Sweep::new(config(6), forecaster()).run().unwrap();

        let summary = |r: &SweepReport| {
            r.selection
                .selections
                .iter()
                .map(|s| (s.group_key.clone(), s.winning_label.clone(), s.winning_metric))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&a), summary(&b));
    }

    #[test]
    fn over_request_runs_full_grid_with_diagnostic() {
        let report = Sweep::new(config(2).with_requested_trials(1000), forecaster())
            .run()
            .unwrap();

        assert_eq!(report.trials.len(), 6);
        assert!(report.diagnostics.iter().any(|d| matches!(
            d.kind,
            DiagnosticKind::CandidatesExhausted {
                requested: 1000,
                available: 6
            }
        )));
    }

    #[test]
    fn group_without_success_is_partial_failure() {
        let trainable: Arc<dyn Trainable> = Arc::new(|_: &TrialContext, params: &ParameterSet| -> anyhow::Result<Metrics> {
            if params["partition"].as_label() == "store_1" {
                anyhow::bail!("no data for store_1");
            }
            Ok(Metrics::from([("mse".to_string(), 1.0)]))
        });
        let report = Sweep::new(config(3), trainable).run().unwrap();

        assert_eq!(report.status, SweepStatus::PartialFailure);
        assert_eq!(report.status.exit_code(), 2);
        assert_eq!(report.selection.unresolved_groups, vec!["store_1".to_string()]);
        assert_eq!(report.trials.len(), 9);

        let table = report.render_table();
        assert!(table
            .lines()
            .any(|line| line.contains("store_1") && line.contains(NO_SUCCESS_MARKER)));
    }

    #[test]
    fn fully_cancelled_group_is_still_reported() {
        let prepared = Sweep::new(config(2), forecaster()).prepare().unwrap();
        prepared.handle().cancel_all();
        let report = prepared.run().unwrap();

        assert!(report.trials.is_empty());
        assert_eq!(report.cancelled.len(), 6);
        assert_eq!(report.status, SweepStatus::PartialFailure);
        assert_eq!(
            report.selection.unresolved_groups,
            vec!["store_0".to_string(), "store_1".to_string()]
        );
    }

    #[test]
    fn unresolved_groups_keep_submission_order() {
        let trainable: Arc<dyn Trainable> = Arc::new(|_: &TrialContext, params: &ParameterSet| -> anyhow::Result<Metrics> {
            if params["partition"].as_label() == "store_1" {
                anyhow::bail!("no data for store_1");
            }
            Ok(Metrics::from([("mse".to_string(), 1.0)]))
        });
        let prepared = Sweep::new(config(3), trainable).prepare().unwrap();
        let store_0: Vec<TrialId> = prepared
            .units()
            .filter(|u| u.params()["partition"].as_label() == "store_0")
            .map(|u| u.id())
            .collect();
        let handle = prepared.handle();
        for id in store_0 {
            handle.cancel(id);
        }
        let report = prepared.run().unwrap();

        assert_eq!(report.cancelled.len(), 3);
        assert_eq!(
            report.selection.unresolved_groups,
            vec!["store_0".to_string(), "store_1".to_string()]
        );
        assert_eq!(report.selection.selections[0].group_key, "store_2");
    }

    #[test]
    fn unsatisfiable_resources_fail_before_running() {
        let config = config(2).with_resources(ResourceRequest::cpus(8.0), ResourceRequest::cpus(4.0));
        let err = Sweep::new(config, forecaster()).run().unwrap_err();

        assert!(err.is_configuration());
        assert!(matches!(
            err,
            FoError::Config(ConfigError::UnsatisfiableRequest { .. })
        ));
    }

    #[test]
    fn report_serializes_to_json() {
        let config = config(1).with_objective("mae", ObjectiveDirection::Minimize);
        let report = Sweep::new(config, forecaster()).run().unwrap();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["trials"].as_array().unwrap().len(), 3);
        assert_eq!(json["selection"]["selections"][0]["group_key"], "store_0");
    }
}
