//! Search space definitions and grid expansion.

use fo_types::{ConfigError, Diagnostic, DiagnosticKind, ParameterSet, ParameterValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as seen by the trainable (e.g. "partition").
    pub name: String,
    /// How values for this parameter are produced.
    pub kind: ParameterKind,
}

/// Describes how a parameter is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// The same value in every trial.
    Literal { value: ParameterValue },
    /// One trial per candidate value.
    Grid { values: Vec<ParameterValue> },
    /// Integer grid over [low, high] inclusive.
    IntRange { low: i64, high: i64 },
}

impl ParameterKind {
    /// Number of distinct values along this dimension.
    fn cardinality(&self) -> usize {
        match self {
            Self::Literal { .. } => 1,
            Self::Grid { values } => values.len(),
            Self::IntRange { low, high } => (high - low + 1) as usize,
        }
    }

    fn value_at(&self, index: usize) -> ParameterValue {
        match self {
            Self::Literal { value } => value.clone(),
            Self::Grid { values } => values[index].clone(),
            Self::IntRange { low, .. } => ParameterValue::Int(low + index as i64),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
///
/// Declaration order matters: the first grid dimension varies slowest when
/// the space is expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_literal(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Literal {
                value: value.into(),
            },
        });
        self
    }

    pub fn add_grid<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Grid {
                values: values.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn add_int_range(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    /// Replace the values of `name` with a grid, keeping its position, or
    /// append it when the space has no such parameter.
    pub fn set_grid<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let name = name.into();
        let kind = ParameterKind::Grid {
            values: values.into_iter().map(Into::into).collect(),
        };
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(param) => param.kind = kind,
            None => self.parameters.push(ParameterDef { name, kind }),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check that the space can be expanded at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::EmptySpace);
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(ConfigError::DuplicateParameter {
                    parameter: param.name.clone(),
                });
            }
            match &param.kind {
                ParameterKind::Grid { values } if values.is_empty() => {
                    return Err(ConfigError::EmptyGrid {
                        parameter: param.name.clone(),
                    });
                }
                ParameterKind::IntRange { low, high } if low > high => {
                    return Err(ConfigError::InvalidRange {
                        parameter: param.name.clone(),
                        low: *low,
                        high: *high,
                    });
                }
                _ => {}
            }
        }

        self.grid_size().map(|_| ()).ok_or(ConfigError::GridOverflow)
    }

    /// Total number of grid points, or `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => {
                    let width = high.checked_sub(*low)?.checked_add(1)?;
                    usize::try_from(width).ok()?
                }
                kind => kind.cardinality(),
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// The binding at position `index` of the Cartesian product, decoded as a
    /// mixed-radix number whose most significant digit is the first
    /// parameter. Caller guarantees `index < grid_size()`.
    fn binding_at(&self, mut index: usize) -> ParameterSet {
        let mut digits = vec![0usize; self.parameters.len()];
        for (slot, param) in self.parameters.iter().enumerate().rev() {
            let radix = param.kind.cardinality();
            digits[slot] = index % radix;
            index /= radix;
        }

        self.parameters
            .iter()
            .zip(digits)
            .map(|(param, digit)| (param.name.clone(), param.kind.value_at(digit)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of expanding a search space.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    /// Concrete bindings, one per trial, in deterministic order.
    pub bindings: Vec<ParameterSet>,
    /// Number of points in the full grid.
    pub available: usize,
    pub diagnostics: Vec<Diagnostic>,
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    space: SearchSpace,
    cursor: usize,
    size: usize,
}

impl GridSearch {
    pub fn new(space: SearchSpace) -> Result<Self, ConfigError> {
        space.validate()?;
        let size = space.grid_size().ok_or(ConfigError::GridOverflow)?;
        Ok(Self {
            space,
            cursor: 0,
            size,
        })
    }

    /// Expand `space` into at most `requested` bindings (`None` = all).
    ///
    /// Asking for more trials than the grid holds is not an error: the full
    /// grid is used and a [`DiagnosticKind::CandidatesExhausted`] diagnostic
    /// is returned.
    pub fn expand(space: &SearchSpace, requested: Option<usize>) -> Result<Expansion, ConfigError> {
        if requested == Some(0) {
            return Err(ConfigError::ZeroTrials);
        }

        let mut grid = Self::new(space.clone())?;
        let available = grid.size;
        let mut diagnostics = Vec::new();

        let count = match requested {
            Some(requested) if requested > available => {
                let diag = Diagnostic::new(DiagnosticKind::CandidatesExhausted {
                    requested,
                    available,
                });
                warn!("{}", diag);
                diagnostics.push(diag);
                available
            }
            Some(requested) => requested,
            None => available,
        };

        let bindings = grid.suggest(count);
        debug!(count = bindings.len(), available, "expanded search space");

        Ok(Expansion {
            bindings,
            available,
            diagnostics,
        })
    }

    /// Next batch of up to `count` bindings.
    pub fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let end = self.cursor.saturating_add(count).min(self.size);
        let batch = (self.cursor..end)
            .map(|i| self.space.binding_at(i))
            .collect();
        self.cursor = end;
        batch
    }

    pub fn remaining(&self) -> usize {
        self.size - self.cursor
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
