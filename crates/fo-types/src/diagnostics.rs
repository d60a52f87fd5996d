//! Non-fatal conditions surfaced alongside results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of non-fatal condition was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// More trials were requested than the grid can produce.
    CandidatesExhausted { requested: usize, available: usize },
    /// No trial in the group succeeded, so it has no winner.
    GroupHasNoSuccess { group: String, failed: usize },
    /// A succeeded trial did not report the objective metric.
    MetricMissing { trial_number: usize, metric: String },
    /// A trial produced no group key.
    UngroupedTrial { trial_number: usize },
}

/// A warning-level diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind) -> Self {
        let message = match &kind {
            DiagnosticKind::CandidatesExhausted { requested, available } => format!(
                "requested {requested} trials but only {available} candidates exist; using all {available}"
            ),
            DiagnosticKind::GroupHasNoSuccess { group, failed } => {
                format!("group '{group}' has no successful trial ({failed} failed)")
            }
            DiagnosticKind::MetricMissing { trial_number, metric } => {
                format!("trial #{trial_number} succeeded without reporting '{metric}'")
            }
            DiagnosticKind::UngroupedTrial { trial_number } => {
                format!("trial #{trial_number} has no group key")
            }
        };
        Self { kind, message }
    }

    pub fn is_group_without_success(&self) -> bool {
        matches!(self.kind, DiagnosticKind::GroupHasNoSuccess { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
