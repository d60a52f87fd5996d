//! Best-of selection per group.

use fo_types::{Diagnostic, DiagnosticKind, TrialId, TrialOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ObjectiveDirection;

/// The winning trial of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSelection {
    pub group_key: String,
    pub winning_label: String,
    pub winning_metric: f64,
    pub trial_id: TrialId,
    pub trial_number: usize,
}

/// Winners per group plus the groups that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    /// One entry per group with at least one eligible success, ordered by
    /// the group's first submitted trial.
    pub selections: Vec<BestSelection>,
    /// Groups with no eligible success, in the same order.
    pub unresolved_groups: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SelectionReport {
    pub fn get(&self, group_key: &str) -> Option<&BestSelection> {
        self.selections.iter().find(|s| s.group_key == group_key)
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved_groups.is_empty()
    }
}

/// Key function grouping outcomes by the plain-text value of a parameter.
pub fn param_key(name: &str) -> impl Fn(&TrialOutcome) -> Option<String> + '_ {
    move |outcome| outcome.param(name).map(|v| v.as_label())
}

struct GroupAcc<'a> {
    key: String,
    best: Option<(&'a TrialOutcome, f64)>,
    failed: usize,
}

/// Pick the best outcome per group by `metric_name`.
///
/// Failed outcomes and outcomes without a finite value for the metric never
/// win. Ties go to the earliest submitted trial, so the result does not
/// depend on the order in which trials completed.
pub fn select_best<'a, I, F>(
    outcomes: I,
    group_key_fn: F,
    metric_name: &str,
    label_field: &str,
    mode: ObjectiveDirection,
) -> SelectionReport
where
    I: IntoIterator<Item = &'a TrialOutcome>,
    F: Fn(&TrialOutcome) -> Option<String>,
{
    let mut ordered: Vec<&TrialOutcome> = outcomes.into_iter().collect();
    ordered.sort_by_key(|o| o.trial_number);

    let mut diagnostics = Vec::new();
    let mut groups: Vec<GroupAcc<'a>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for outcome in ordered {
        let Some(key) = group_key_fn(outcome) else {
            diagnostics.push(Diagnostic::new(DiagnosticKind::UngroupedTrial {
                trial_number: outcome.trial_number,
            }));
            continue;
        };

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(GroupAcc {
                key,
                best: None,
                failed: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        if !outcome.is_success() {
            group.failed += 1;
            continue;
        }

        let value = match outcome.metric(metric_name) {
            Some(v) if v.is_finite() => v,
            _ => {
                diagnostics.push(Diagnostic::new(DiagnosticKind::MetricMissing {
                    trial_number: outcome.trial_number,
                    metric: metric_name.to_string(),
                }));
                continue;
            }
        };

        let replace = match group.best {
            None => true,
            Some((_, incumbent)) => mode.improves(value, incumbent),
        };
        if replace {
            group.best = Some((outcome, value));
        }
    }

    let mut report = SelectionReport::default();
    for group in groups {
        match group.best {
            Some((outcome, value)) => {
                let winning_label = outcome
                    .param(label_field)
                    .map(|v| v.as_label())
                    .unwrap_or_else(|| format!("trial-{}", outcome.trial_number));
                debug!(group = %group.key, label = %winning_label, value, "selected best trial");
                report.selections.push(BestSelection {
                    group_key: group.key,
                    winning_label,
                    winning_metric: value,
                    trial_id: outcome.trial_id,
                    trial_number: outcome.trial_number,
                });
            }
            None => {
                let diag = Diagnostic::new(DiagnosticKind::GroupHasNoSuccess {
                    group: group.key.clone(),
                    failed: group.failed,
                });
                warn!("{}", diag);
                diagnostics.push(diag);
                report.unresolved_groups.push(group.key);
            }
        }
    }

    report.diagnostics = diagnostics;
    report
}
