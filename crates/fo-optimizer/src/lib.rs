//! # fo-optimizer
//!
//! Parameter search and result reduction for Fanout.
//!
//! Provides search space definitions, grid expansion into concrete trial
//! bindings, sweep configuration, and best-of selection over finished trials.

mod config;
mod search;
mod select;

pub use config::{ObjectiveDirection, SweepConfig, SweepId};
pub use search::{Expansion, GridSearch, ParameterDef, ParameterKind, SearchSpace};
pub use select::{param_key, select_best, BestSelection, SelectionReport};
