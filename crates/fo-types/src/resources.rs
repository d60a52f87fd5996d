//! Abstract resource quantities used for admission control.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ConfigError;

/// Well-known resource kind for compute slots.
pub const CPU: &str = "cpu";
/// Well-known resource kind for accelerators.
pub const GPU: &str = "gpu";

/// Quantities are accounted in thousandths so fractional requests such as
/// `0.5` cpu add and subtract exactly.
pub const MILLI: f64 = 1000.0;

/// Largest quantity a request or capacity may name. Keeps the sum of any two
/// milli-scaled quantities inside `u64`.
pub const MAX_QUANTITY: f64 = (u64::MAX / 2) as f64 / MILLI;

/// A mapping of resource kind to quantity.
///
/// Used both for what a single trial asks for and for the total capacity of
/// the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRequest {
    quantities: BTreeMap<String, f64>,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a request of `n` cpu slots.
    pub fn cpus(n: f64) -> Self {
        Self::new().with(CPU, n)
    }

    pub fn with(mut self, kind: impl Into<String>, quantity: f64) -> Self {
        self.quantities.insert(kind.into(), quantity);
        self
    }

    pub fn get(&self, kind: &str) -> f64 {
        self.quantities.get(kind).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.quantities.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Reject quantities the milli-unit ledger cannot account exactly:
    /// negative, NaN, infinite, above [`MAX_QUANTITY`], or positive but
    /// smaller than one milli-unit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, quantity) in self.iter() {
            let too_small = quantity > 0.0 && (quantity * MILLI).round() < 1.0;
            if !quantity.is_finite() || quantity < 0.0 || quantity > MAX_QUANTITY || too_small {
                return Err(ConfigError::InvalidQuantity {
                    kind: kind.to_string(),
                    quantity,
                });
            }
        }
        Ok(())
    }

    /// Quantities converted to integer milli-units, dropping zero entries.
    /// A positive quantity never scales below one milli-unit.
    pub fn to_milli(&self) -> BTreeMap<String, u64> {
        self.iter()
            .map(|(kind, q)| (kind.to_string(), to_milli_units(q)))
            .filter(|(_, q)| *q > 0)
            .collect()
    }

    /// Whether this request could ever be satisfied by `capacity`, i.e. with
    /// nothing else allocated.
    pub fn fits_within(&self, capacity: &ResourceRequest) -> bool {
        let total = capacity.to_milli();
        self.to_milli()
            .iter()
            .all(|(kind, q)| total.get(kind).is_some_and(|cap| q <= cap))
    }
}

fn to_milli_units(quantity: f64) -> u64 {
    let scaled = (quantity * MILLI).round() as u64;
    if quantity > 0.0 {
        scaled.max(1)
    } else {
        scaled
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (kind, quantity)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kind}: {quantity}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ResourceRequest {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            quantities: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
