use thiserror::Error;

/// Main error type for the Fanout system.
///
/// Only run-level failures live here. A single trial failing is never an
/// `FoError`; it is recorded as a failed [`crate::TrialOutcome`].
#[derive(Error, Debug)]
pub enum FoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FoError {
    /// Whether this error stems from user configuration rather than a bug in
    /// the engine.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FoError::Config(_))
    }
}

/// Errors detected before any trial runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Search space is empty")]
    EmptySpace,

    #[error("Grid for parameter '{parameter}' has no candidate values")]
    EmptyGrid { parameter: String },

    #[error("Parameter '{parameter}' is declared more than once")]
    DuplicateParameter { parameter: String },

    #[error("Invalid range for '{parameter}': low {low} is above high {high}")]
    InvalidRange { parameter: String, low: i64, high: i64 },

    #[error("Grid is too large to enumerate")]
    GridOverflow,

    #[error("Requested trial count must be positive")]
    ZeroTrials,

    #[error("Resource request {request} can never fit total capacity {capacity}")]
    UnsatisfiableRequest { request: String, capacity: String },

    #[error("Invalid resource quantity for '{kind}': {quantity}")]
    InvalidQuantity { kind: String, quantity: f64 },

    #[error("Trial {trial_id} submitted more than once")]
    DuplicateSubmission { trial_id: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Resource ledger protocol violations. These indicate a scheduler bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invariant violation: release of {requested} '{kind}' exceeds allocated {allocated}")]
    ReleaseExceedsAllocated {
        kind: String,
        requested: f64,
        allocated: f64,
    },

    #[error("Invariant violation: release of unknown resource kind '{kind}'")]
    UnknownKind { kind: String },
}

/// Result store violations. These indicate an executor bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Duplicate trial: outcome for {trial_id} already recorded")]
    DuplicateTrial { trial_id: String },
}

/// Partition data errors raised by sources and catalogs.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Partition not found: {partition}")]
    PartitionNotFound { partition: String },

    #[error("Column '{column}' not found in {path}")]
    ColumnNotFound { column: String, path: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for Fanout operations
pub type FoResult<T> = Result<T, FoError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::FoError::Config($crate::ConfigError::Invalid {
            message: format!($($arg)*),
        })
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::FoError::Internal(format!($($arg)*))
    };
}
