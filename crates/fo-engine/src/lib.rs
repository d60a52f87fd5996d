//! # fo-engine
//!
//! Runs many independent trials under a shared resource budget.
//!
//! A [`Sweep`] expands a search space into [`TrialUnit`]s, the [`Scheduler`]
//! admits them against a [`ResourceLedger`] and runs them on a fixed worker
//! pool through the [`TrialExecutor`], every outcome lands in the
//! [`ResultStore`], and the best trial per group is selected at the end.

pub mod executor;
pub mod forecast;
pub mod ledger;
pub mod scheduler;
pub mod store;
pub mod sweep;
pub mod unit;

pub use executor::TrialExecutor;
pub use forecast::{ForecastModel, ForecastTrainable};
pub use ledger::{Lease, LedgerSnapshot, ResourceLedger};
pub use scheduler::{
    RunSummary, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, StatsSnapshot, TrialState,
};
pub use store::ResultStore;
pub use sweep::{PreparedSweep, Sweep, SweepReport, SweepStatus, NO_SUCCESS_MARKER};
pub use unit::{units_from_bindings, CancelToken, Trainable, TrialContext, TrialUnit};
