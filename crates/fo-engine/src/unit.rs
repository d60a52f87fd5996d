//! Trial units and the trainable contract.

use fo_types::{Metrics, ParameterSet, ResourceRequest, TrialId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// User training logic. Receives the trial's parameter binding and an
/// explicit context, and returns the final metrics map.
///
/// Errors are captured by the executor and turned into failed outcomes; they
/// never abort the run.
pub trait Trainable: Send + Sync {
    fn train(&self, ctx: &TrialContext, params: &ParameterSet) -> anyhow::Result<Metrics>;

    fn name(&self) -> &str {
        "trainable"
    }
}

impl<F> Trainable for F
where
    F: Fn(&TrialContext, &ParameterSet) -> anyhow::Result<Metrics> + Send + Sync,
{
    fn train(&self, ctx: &TrialContext, params: &ParameterSet) -> anyhow::Result<Metrics> {
        self(ctx, params)
    }
}

/// Cooperative stop signal shared between the scheduler, the executor and
/// the running trainable.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-trial context handed to the trainable.
#[derive(Debug, Clone)]
pub struct TrialContext {
    pub trial_id: TrialId,
    pub trial_number: usize,
    /// 1-based attempt number.
    pub attempt: u32,
    pub worker: String,
    cancel: CancelToken,
}

impl TrialContext {
    pub fn new(unit: &TrialUnit, worker: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            trial_id: unit.id(),
            trial_number: unit.trial_number(),
            attempt: 1,
            worker: worker.into(),
            cancel,
        }
    }

    pub(crate) fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Long-running trainables should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// One unit of work: a parameter binding, its resource request and the
/// function that runs it. Immutable once built.
#[derive(Clone)]
pub struct TrialUnit {
    id: TrialId,
    trial_number: usize,
    params: Arc<ParameterSet>,
    resource_request: ResourceRequest,
    trainable: Arc<dyn Trainable>,
}

impl TrialUnit {
    pub fn new(
        trial_number: usize,
        params: ParameterSet,
        resource_request: ResourceRequest,
        trainable: Arc<dyn Trainable>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), trial_number, params, resource_request, trainable)
    }

    pub fn with_id(
        id: TrialId,
        trial_number: usize,
        params: ParameterSet,
        resource_request: ResourceRequest,
        trainable: Arc<dyn Trainable>,
    ) -> Self {
        Self {
            id,
            trial_number,
            params: Arc::new(params),
            resource_request,
            trainable,
        }
    }

    pub fn id(&self) -> TrialId {
        self.id
    }

    pub fn trial_number(&self) -> usize {
        self.trial_number
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub(crate) fn shared_params(&self) -> Arc<ParameterSet> {
        Arc::clone(&self.params)
    }

    pub fn resource_request(&self) -> &ResourceRequest {
        &self.resource_request
    }

    pub(crate) fn trainable(&self) -> Arc<dyn Trainable> {
        Arc::clone(&self.trainable)
    }
}

impl fmt::Debug for TrialUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialUnit")
            .field("id", &self.id)
            .field("trial_number", &self.trial_number)
            .field("params", &self.params)
            .field("resource_request", &self.resource_request)
            .field("trainable", &self.trainable.name())
            .finish()
    }
}

/// Build one unit per binding, numbered in binding order.
pub fn units_from_bindings(
    bindings: Vec<ParameterSet>,
    resource_request: &ResourceRequest,
    trainable: Arc<dyn Trainable>,
) -> Vec<TrialUnit> {
    bindings
        .into_iter()
        .enumerate()
        .map(|(n, params)| TrialUnit::new(n, params, resource_request.clone(), Arc::clone(&trainable)))
        .collect()
}
