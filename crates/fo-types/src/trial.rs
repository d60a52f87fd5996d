//! Trial identity, parameter bindings and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique trial identifier.
pub type TrialId = Uuid;

/// Metrics reported by a trainable, keyed by metric name.
pub type Metrics = BTreeMap<String, f64>;

/// A concrete parameter value bound into a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Str(String),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Plain-text rendering used for group keys and labels (strings are not
    /// quoted).
    pub fn as_label(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Json(serde_json::Value::String(s)) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One concrete binding of parameter names to values. Ordered so that
/// rendering and hashing are deterministic.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// Terminal status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a trial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialErrorKind {
    /// The trainable returned an error.
    Raised,
    /// The trainable panicked.
    Panicked,
    /// The trainable ran past the configured timeout.
    TimedOut,
    /// The trial was cancelled while running.
    Cancelled,
}

impl TrialErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raised => "raised",
            Self::Panicked => "panicked",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether another attempt may succeed.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Raised | Self::Panicked)
    }
}

/// Structured error descriptor attached to a failed outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialError {
    pub kind: TrialErrorKind,
    pub message: String,
}

impl TrialError {
    pub fn new(kind: TrialErrorKind, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = kind.as_str().to_string();
        }
        Self { kind, message }
    }
}

impl fmt::Display for TrialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Result of running one trial. Created exactly once per trial and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial_id: TrialId,
    /// Position of the trial in the submitted sequence.
    pub trial_number: usize,
    /// Position of the trial in admission order.
    pub admission_seq: u64,
    pub params: ParameterSet,
    status: TrialStatus,
    metrics: Option<Metrics>,
    error: Option<TrialError>,
    pub attempts: u32,
    pub worker: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Identity and timing shared by both outcome constructors.
#[derive(Debug, Clone)]
pub struct OutcomeHeader {
    pub trial_id: TrialId,
    pub trial_number: usize,
    pub admission_seq: u64,
    pub params: ParameterSet,
    pub attempts: u32,
    pub worker: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TrialOutcome {
    pub fn succeeded(header: OutcomeHeader, metrics: Metrics) -> Self {
        Self::build(header, TrialStatus::Succeeded, Some(metrics), None)
    }

    pub fn failed(header: OutcomeHeader, error: TrialError) -> Self {
        Self::build(header, TrialStatus::Failed, None, Some(error))
    }

    fn build(
        header: OutcomeHeader,
        status: TrialStatus,
        metrics: Option<Metrics>,
        error: Option<TrialError>,
    ) -> Self {
        Self {
            trial_id: header.trial_id,
            trial_number: header.trial_number,
            admission_seq: header.admission_seq,
            params: header.params,
            status,
            metrics,
            error,
            attempts: header.attempts,
            worker: header.worker,
            started_at: header.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TrialStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == TrialStatus::Succeeded
    }

    /// Reported metrics; `Some` iff the trial succeeded.
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.get(name).copied())
    }

    /// Error descriptor; `Some` iff the trial failed.
    pub fn error(&self) -> Option<&TrialError> {
        self.error.as_ref()
    }

    pub fn param(&self, name: &str) -> Option<&ParameterValue> {
        self.params.get(name)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
