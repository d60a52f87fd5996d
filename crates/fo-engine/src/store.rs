//! Append-only store of trial outcomes.

use fo_types::{StoreError, TrialId, TrialOutcome};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by (admission sequence, insertion counter).
    outcomes: BTreeMap<(u64, u64), TrialOutcome>,
    index: HashMap<TrialId, (u64, u64)>,
    inserted: u64,
}

/// Holds exactly one outcome per trial id. Writers take an exclusive lock;
/// readers may proceed concurrently.
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: RwLock<Inner>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. A second outcome for the same trial is rejected and
    /// the stored one is left untouched.
    pub fn record(&self, outcome: TrialOutcome) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&outcome.trial_id) {
            return Err(StoreError::DuplicateTrial {
                trial_id: outcome.trial_id.to_string(),
            });
        }

        let key = (outcome.admission_seq, inner.inserted);
        inner.inserted += 1;
        inner.index.insert(outcome.trial_id, key);
        debug!(trial = %outcome.trial_id, status = ?outcome.status(), "recorded outcome");
        inner.outcomes.insert(key, outcome);
        Ok(())
    }

    pub fn get(&self, trial_id: &TrialId) -> Option<TrialOutcome> {
        let inner = self.inner.read();
        inner
            .index
            .get(trial_id)
            .and_then(|key| inner.outcomes.get(key))
            .cloned()
    }

    pub fn contains(&self, trial_id: &TrialId) -> bool {
        self.inner.read().index.contains_key(trial_id)
    }

    /// Every outcome, in admission order.
    pub fn all(&self) -> Vec<TrialOutcome> {
        self.inner.read().outcomes.values().cloned().collect()
    }

    /// Outcomes grouped by `key_fn`. Groups appear in the order their first
    /// member was admitted; outcomes with no key are skipped.
    pub fn by_group<F>(&self, key_fn: F) -> Vec<(String, Vec<TrialOutcome>)>
    where
        F: Fn(&TrialOutcome) -> Option<String>,
    {
        let inner = self.inner.read();
        let mut groups: Vec<(String, Vec<TrialOutcome>)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for outcome in inner.outcomes.values() {
            let Some(key) = key_fn(outcome) else { continue };
            let slot = *slots.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(outcome.clone());
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.inner.read().outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn succeeded_count(&self) -> usize {
        self.inner
            .read()
            .outcomes
            .values()
            .filter(|o| o.is_success())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.succeeded_count()
    }
}
