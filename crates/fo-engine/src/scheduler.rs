//! Scheduler: admits pending trial units against the resource ledger and
//! runs them on a fixed worker pool.
//!
//! A single dispatcher thread (the caller of [`Scheduler::run`]) owns the
//! pending queue. It scans the queue in submission order and admits every
//! unit whose request currently fits, so a large request never holds up
//! smaller ones behind it. Admission stops once every worker has a unit, so
//! the ledger only ever holds leases for trials that are running or about to.
//! Workers report back over a completion channel;
//! each completion means a lease was returned and is the dispatcher's cue to
//! try admission again.

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use dashmap::DashMap;
use fo_types::{
    internal_error, ConfigError, FoError, FoResult, TrialErrorKind, TrialId, TrialOutcome,
    TrialStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::executor::TrialExecutor;
use crate::ledger::{Lease, ResourceLedger};
use crate::store::ResultStore;
use crate::unit::{CancelToken, TrialContext, TrialUnit};

/// Lifecycle of a submitted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Pending,
    Admitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TrialState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    fn from_outcome(outcome: &TrialOutcome) -> Self {
        match (outcome.status(), outcome.error().map(|e| e.kind)) {
            (TrialStatus::Succeeded, _) => Self::Succeeded,
            (TrialStatus::Failed, Some(TrialErrorKind::Cancelled)) => Self::Cancelled,
            (TrialStatus::Failed, _) => Self::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub trial_timeout: Option<Duration>,
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            trial_timeout: None,
            max_retries: 0,
        }
    }
}

/// Live counters, updated by the dispatcher and workers.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: AtomicUsize,
    admitted: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Point-in-time copy of [`SchedulerStats`].
///
/// `failed` counts every failed outcome, including trials cancelled while
/// running; `cancelled` additionally counts pending units that were removed
/// before they ever ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: usize,
    pub admitted: usize,
    pub running: usize,
    pub peak_running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SchedulerStats {
    fn trial_started(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
    }

    fn trial_finished(&self, state: TrialState) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        match state {
            TrialState::Succeeded => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            TrialState::Cancelled => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            admitted: self.admitted.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

/// What a finished [`Scheduler::run`] reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    /// Units removed from the pending queue before admission. They have no
    /// outcome in the store.
    pub cancelled: Vec<TrialId>,
}

enum Control {
    Cancel(TrialId),
    CancelAll,
}

struct Dispatch {
    unit: TrialUnit,
    lease: Lease,
    admission_seq: u64,
    cancel: CancelToken,
}

struct Completion {
    trial_id: TrialId,
    result: FoResult<()>,
}

type Shape = BTreeMap<String, u64>;

struct PendingEntry {
    unit: TrialUnit,
    shape: Shape,
}

/// Cheap, cloneable handle for observing and cancelling a run from other
/// threads.
#[derive(Clone)]
pub struct SchedulerHandle {
    control: Sender<Control>,
    tokens: Arc<DashMap<TrialId, CancelToken>>,
    states: Arc<DashMap<TrialId, TrialState>>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    /// Cancel one unit. A pending unit is dropped without an outcome; a
    /// running one is signalled and finishes as a failed, cancelled trial.
    pub fn cancel(&self, trial_id: TrialId) {
        if let Some(token) = self.tokens.get(&trial_id) {
            token.cancel();
        }
        let _ = self.control.send(Control::Cancel(trial_id));
    }

    pub fn cancel_all(&self) {
        for token in self.tokens.iter() {
            token.cancel();
        }
        let _ = self.control.send(Control::CancelAll);
    }

    pub fn state(&self, trial_id: &TrialId) -> Option<TrialState> {
        self.states.get(trial_id).map(|s| *s)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct Scheduler {
    ledger: Arc<ResourceLedger>,
    store: Arc<ResultStore>,
    config: SchedulerConfig,
    pending: VecDeque<PendingEntry>,
    shape_counts: HashMap<Shape, usize>,
    submitted_ids: HashSet<TrialId>,
    tokens: Arc<DashMap<TrialId, CancelToken>>,
    states: Arc<DashMap<TrialId, TrialState>>,
    stats: Arc<SchedulerStats>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(ledger: Arc<ResourceLedger>, store: Arc<ResultStore>, config: SchedulerConfig) -> Self {
        let (control_tx, control_rx) = unbounded();
        Self {
            ledger,
            store,
            config,
            pending: VecDeque::new(),
            shape_counts: HashMap::new(),
            submitted_ids: HashSet::new(),
            tokens: Arc::new(DashMap::new()),
            states: Arc::new(DashMap::new()),
            stats: Arc::new(SchedulerStats::default()),
            control_tx,
            control_rx,
            next_seq: 0,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            control: self.control_tx.clone(),
            tokens: Arc::clone(&self.tokens),
            states: Arc::clone(&self.states),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn state(&self, trial_id: &TrialId) -> Option<TrialState> {
        self.states.get(trial_id).map(|s| *s)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Units still waiting for admission, in submission order.
    pub fn pending_units(&self) -> impl Iterator<Item = &TrialUnit> {
        self.pending.iter().map(|e| &e.unit)
    }

    /// Queue units for execution. The whole batch is checked first: if any
    /// request is malformed or can never fit the ledger's capacity, or an id
    /// repeats, nothing is queued.
    pub fn submit(&mut self, units: Vec<TrialUnit>) -> FoResult<()> {
        let mut batch_ids = HashSet::with_capacity(units.len());
        for unit in &units {
            unit.resource_request().validate()?;
            if !self.ledger.fits_capacity(unit.resource_request()) {
                return Err(ConfigError::UnsatisfiableRequest {
                    request: unit.resource_request().to_string(),
                    capacity: self.ledger.snapshot().capacity.to_string(),
                }
                .into());
            }
            if self.submitted_ids.contains(&unit.id()) || !batch_ids.insert(unit.id()) {
                return Err(ConfigError::DuplicateSubmission {
                    trial_id: unit.id().to_string(),
                }
                .into());
            }
        }

        info!("Submitting {} trial units", units.len());
        for unit in units {
            let shape = unit.resource_request().to_milli();
            *self.shape_counts.entry(shape.clone()).or_insert(0) += 1;
            self.submitted_ids.insert(unit.id());
            self.states.insert(unit.id(), TrialState::Pending);
            self.stats.submitted.fetch_add(1, Ordering::SeqCst);
            self.pending.push_back(PendingEntry { unit, shape });
        }
        Ok(())
    }

    /// Run until every submitted unit is terminal or cancelled.
    ///
    /// Trial failures are recorded as outcomes and never end the run. An
    /// engine-level failure (duplicate outcome, ledger violation) stops
    /// admission; units already running are drained and the error returned.
    pub fn run(&mut self) -> FoResult<RunSummary> {
        let workers = self.config.workers.max(1);
        info!(
            "Starting scheduler with {} workers for {} pending trials",
            workers,
            self.pending.len()
        );

        let (dispatch_tx, dispatch_rx) = unbounded::<Dispatch>();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let executor = TrialExecutor::new(self.config.trial_timeout, self.config.max_retries);

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let worker = Worker {
                name: format!("fanout-worker-{i}"),
                executor: executor.clone(),
                store: Arc::clone(&self.store),
                states: Arc::clone(&self.states),
                stats: Arc::clone(&self.stats),
            };
            let rx = dispatch_rx.clone();
            let tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run(rx, tx))?;
            handles.push(handle);
        }
        drop(dispatch_rx);
        drop(done_tx);

        let result = self.dispatch(workers, &dispatch_tx, &done_rx);
        drop(dispatch_tx);
        join_workers(handles);

        let cancelled = result?;
        let summary = RunSummary {
            stats: self.stats.snapshot(),
            cancelled,
        };
        info!(
            succeeded = summary.stats.succeeded,
            failed = summary.stats.failed,
            cancelled = summary.stats.cancelled,
            peak_running = summary.stats.peak_running,
            "Scheduler run completed"
        );
        Ok(summary)
    }

    fn dispatch(
        &mut self,
        workers: usize,
        dispatch_tx: &Sender<Dispatch>,
        done_rx: &Receiver<Completion>,
    ) -> FoResult<Vec<TrialId>> {
        let mut in_flight = 0usize;
        let mut cancelled = Vec::new();
        let mut fatal: Option<FoError> = None;
        let control_rx = self.control_rx.clone();

        loop {
            while let Ok(msg) = control_rx.try_recv() {
                self.apply_control(msg, &mut cancelled);
            }

            if fatal.is_none() {
                match self.admit(workers - in_flight, dispatch_tx) {
                    Ok(n) => in_flight += n,
                    Err(e) => fatal = Some(e),
                }
            }

            if in_flight == 0 {
                if fatal.is_none() && !self.pending.is_empty() {
                    // Every request fits total capacity, so an idle pool that
                    // admits nothing means something outside holds the ledger.
                    fatal = Some(internal_error!(
                        "{} pending trials cannot be admitted while no trial is running",
                        self.pending.len()
                    ));
                }
                break;
            }

            select! {
                recv(done_rx) -> msg => match msg {
                    Ok(completion) => {
                        in_flight -= 1;
                        self.tokens.remove(&completion.trial_id);
                        if let Err(e) = completion.result {
                            error!(trial = %completion.trial_id, "fatal scheduler error: {}", e);
                            if fatal.is_none() {
                                fatal = Some(e);
                            }
                        }
                    }
                    Err(_) => {
                        fatal.get_or_insert(FoError::Internal(
                            "all workers exited with trials in flight".to_string(),
                        ));
                        break;
                    }
                },
                recv(control_rx) -> msg => {
                    if let Ok(msg) = msg {
                        self.apply_control(msg, &mut cancelled);
                    }
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(cancelled),
        }
    }

    /// Admit pending units that fit right now, in submission order, up to
    /// `idle_workers`. A unit only holds a lease once a worker is free to run it.
    fn admit(&mut self, idle_workers: usize, dispatch_tx: &Sender<Dispatch>) -> FoResult<usize> {
        let mut admitted = 0;
        let mut blocked: HashSet<Shape> = HashSet::new();
        let mut i = 0;

        // Once every distinct pending shape has failed to fit, nothing else can.
        while admitted < idle_workers
            && i < self.pending.len()
            && blocked.len() < self.shape_counts.len()
        {
            if blocked.contains(&self.pending[i].shape) {
                i += 1;
                continue;
            }

            let Some(lease) = self.ledger.try_lease(self.pending[i].unit.resource_request()) else {
                blocked.insert(self.pending[i].shape.clone());
                i += 1;
                continue;
            };
            let Some(entry) = self.pending.remove(i) else {
                break;
            };
            self.forget_shape(&entry.shape);

            let unit = entry.unit;
            let cancel = CancelToken::new();
            let admission_seq = self.next_seq;
            self.next_seq += 1;
            self.tokens.insert(unit.id(), cancel.clone());
            self.states.insert(unit.id(), TrialState::Admitted);
            self.stats.admitted.fetch_add(1, Ordering::SeqCst);
            debug!(trial = %unit.id(), admission_seq, "admitted trial");

            dispatch_tx
                .send(Dispatch {
                    unit,
                    lease,
                    admission_seq,
                    cancel,
                })
                .map_err(|_| FoError::Internal("worker pool is gone".to_string()))?;
            admitted += 1;
        }

        Ok(admitted)
    }

    fn apply_control(&mut self, msg: Control, cancelled: &mut Vec<TrialId>) {
        match msg {
            Control::Cancel(trial_id) => {
                if let Some(pos) = self.pending.iter().position(|e| e.unit.id() == trial_id) {
                    if let Some(entry) = self.pending.remove(pos) {
                        self.drop_pending(entry, cancelled);
                    }
                } else if let Some(token) = self.tokens.get(&trial_id) {
                    token.cancel();
                } else {
                    debug!(trial = %trial_id, "cancel requested for unknown or finished trial");
                }
            }
            Control::CancelAll => {
                warn!("Cancelling {} pending trials", self.pending.len());
                while let Some(entry) = self.pending.pop_front() {
                    self.drop_pending(entry, cancelled);
                }
                for token in self.tokens.iter() {
                    token.cancel();
                }
            }
        }
    }

    fn drop_pending(&mut self, entry: PendingEntry, cancelled: &mut Vec<TrialId>) {
        let trial_id = entry.unit.id();
        self.forget_shape(&entry.shape);
        self.states.insert(trial_id, TrialState::Cancelled);
        self.stats.cancelled.fetch_add(1, Ordering::SeqCst);
        info!(trial = %trial_id, "cancelled pending trial");
        cancelled.push(trial_id);
    }

    fn forget_shape(&mut self, shape: &Shape) {
        if let Some(count) = self.shape_counts.get_mut(shape) {
            *count -= 1;
            if *count == 0 {
                self.shape_counts.remove(shape);
            }
        }
    }
}

struct Worker {
    name: String,
    executor: TrialExecutor,
    store: Arc<ResultStore>,
    states: Arc<DashMap<TrialId, TrialState>>,
    stats: Arc<SchedulerStats>,
}

impl Worker {
    fn run(self, jobs: Receiver<Dispatch>, done: Sender<Completion>) {
        for job in jobs.iter() {
            let Dispatch {
                unit,
                lease,
                admission_seq,
                cancel,
            } = job;
            let trial_id = unit.id();

            self.states.insert(trial_id, TrialState::Running);
            self.stats.trial_started();

            let ctx = TrialContext::new(&unit, self.name.as_str(), cancel);
            let outcome = self.executor.execute(&unit, admission_seq, &ctx);
            let state = TrialState::from_outcome(&outcome);

            let recorded = self.store.record(outcome);
            let released = lease.release();
            self.stats.trial_finished(state);
            self.states.insert(trial_id, state);

            let result = recorded
                .map_err(FoError::from)
                .and_then(|()| released.map_err(FoError::from));
            if done.send(Completion { trial_id, result }).is_err() {
                break;
            }
        }
        debug!(worker = %self.name, "worker exiting");
    }
}

fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            error!("scheduler worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Trainable;
    use fo_types::{Metrics, OutcomeHeader, ParameterSet, ParameterValue, ResourceRequest, CPU};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn setup(capacity: f64, workers: usize) -> (Scheduler, Arc<ResultStore>, Arc<ResourceLedger>) {
        let ledger = Arc::new(ResourceLedger::new(&ResourceRequest::cpus(capacity)));
        let store = Arc::new(ResultStore::new());
        let config = SchedulerConfig {
            workers,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(Arc::clone(&ledger), Arc::clone(&store), config);
        (scheduler, store, ledger)
    }

    fn units(n: usize, cpus: f64, trainable: Arc<dyn Trainable>) -> Vec<TrialUnit> {
        (0..n)
            .map(|i| {
                let params = ParameterSet::from([("partition".to_string(), ParameterValue::Int(i as i64))]);
                TrialUnit::new(i, params, ResourceRequest::cpus(cpus), Arc::clone(&trainable))
            })
            .collect()
    }

    fn partition_metric() -> Arc<dyn Trainable> {
        Arc::new(|_: &TrialContext, params: &ParameterSet| -> anyhow::Result<Metrics> {
            let p = params["partition"].as_label().parse::<f64>()?;
            Ok(Metrics::from([("mse".to_string(), p * 1.5)]))
        })
    }

    #[test]
    fn capacity_limits_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let trainable: Arc<dyn Trainable> = Arc::new(move |_: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(Metrics::from([("mse".to_string(), 1.0)]))
        });

        let (mut scheduler, store, ledger) = setup(4.0, 4);
        scheduler.submit(units(4, 2.0, trainable)).unwrap();
        let summary = scheduler.run().unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(summary.stats.peak_running, 2);
        assert_eq!(summary.stats.succeeded, 4);
        assert_eq!(store.len(), 4);
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn idle_capacity_is_not_leased_beyond_workers() {
        let (mut scheduler, store, ledger) = setup(4.0, 1);
        let handle = scheduler.handle();
        let overheld = Arc::new(AtomicUsize::new(0));
        let (l, o) = (Arc::clone(&ledger), Arc::clone(&overheld));
        let trainable: Arc<dyn Trainable> = Arc::new(move |_: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            let allocated = l.snapshot().allocated.get(CPU);
            let running = handle.stats().running as f64;
            if allocated > running {
                o.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(5));
            Ok(Metrics::from([("mse".to_string(), allocated)]))
        });

        scheduler.submit(units(8, 1.0, trainable)).unwrap();
        let summary = scheduler.run().unwrap();

        assert_eq!(overheld.load(Ordering::SeqCst), 0);
        assert_eq!(summary.stats.peak_running, 1);
        assert!(store.all().iter().all(|o| o.metric("mse") == Some(1.0)));
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn finished_trial_has_released_its_lease() {
        let (mut scheduler, store, ledger) = setup(2.0, 2);
        let handle = scheduler.handle();
        let l = Arc::clone(&ledger);
        let trainable: Arc<dyn Trainable> = Arc::new(move |ctx: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            if ctx.trial_number == 0 {
                return Ok(Metrics::from([("free".to_string(), 0.0)]));
            }
            let start = Instant::now();
            while handle.stats().succeeded == 0 && start.elapsed() < Duration::from_secs(5) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(Metrics::from([("free".to_string(), l.available(CPU))]))
        });

        scheduler.submit(units(2, 1.0, trainable)).unwrap();
        scheduler.run().unwrap();

        let waiter = store.all().into_iter().find(|o| o.trial_number == 1).unwrap();
        assert_eq!(waiter.metric("free"), Some(1.0));
    }

    #[test]
    fn malformed_request_is_rejected_at_submit() {
        let (mut scheduler, _, _) = setup(4.0, 2);
        let err = scheduler.submit(units(1, 0.0001, partition_metric())).unwrap_err();
        assert!(matches!(
            err,
            FoError::Config(ConfigError::InvalidQuantity { .. })
        ));
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    fn failing_trial_does_not_halt_others() {
        let trainable: Arc<dyn Trainable> = Arc::new(|ctx: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            if ctx.trial_number == 2 {
                anyhow::bail!("model did not converge");
            }
            Ok(Metrics::from([("mse".to_string(), 1.0)]))
        });

        let (mut scheduler, store, ledger) = setup(2.0, 2);
        let units = units(5, 1.0, trainable);
        let failing = units[2].id();
        scheduler.submit(units).unwrap();
        let summary = scheduler.run().unwrap();

        assert_eq!(store.len(), 5);
        assert_eq!(store.failed_count(), 1);
        assert_eq!(summary.stats.succeeded, 4);
        assert_eq!(scheduler.state(&failing), Some(TrialState::Failed));
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn unsatisfiable_request_rejects_whole_batch() {
        let (mut scheduler, store, _) = setup(4.0, 2);
        let mut batch = units(2, 1.0, partition_metric());
        batch.extend(units(1, 8.0, partition_metric()));

        let err = scheduler.submit(batch).unwrap_err();
        assert!(matches!(
            err,
            FoError::Config(ConfigError::UnsatisfiableRequest { .. })
        ));
        assert_eq!(scheduler.pending_len(), 0);

        let summary = scheduler.run().unwrap();
        assert_eq!(summary.stats.submitted, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let (mut scheduler, _, _) = setup(4.0, 2);
        let batch = units(2, 1.0, partition_metric());
        let again = vec![batch[0].clone()];

        scheduler.submit(batch).unwrap();
        let err = scheduler.submit(again).unwrap_err();
        assert!(matches!(
            err,
            FoError::Config(ConfigError::DuplicateSubmission { .. })
        ));
        assert_eq!(scheduler.pending_len(), 2);
    }

    #[test]
    fn large_request_does_not_block_smaller_ones() {
        let (mut scheduler, store, _) = setup(4.0, 4);
        let mut batch = units(1, 1.0, partition_metric());
        batch.extend(units(1, 4.0, partition_metric()));
        batch.extend(units(2, 1.0, partition_metric()));
        let first_small = batch[0].id();
        let big = batch[1].id();
        let later_small = batch[2].id();

        scheduler.submit(batch).unwrap();
        scheduler.run().unwrap();

        let seq = |id: TrialId| store.get(&id).unwrap().admission_seq;
        assert_eq!(seq(first_small), 0);
        assert!(seq(later_small) < seq(big));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn cancelled_pending_unit_has_no_outcome() {
        let (mut scheduler, store, _) = setup(1.0, 1);
        let batch = units(3, 1.0, partition_metric());
        let target = batch[2].id();
        scheduler.submit(batch).unwrap();

        let handle = scheduler.handle();
        handle.cancel(target);
        let summary = scheduler.run().unwrap();

        assert_eq!(summary.cancelled, vec![target]);
        assert_eq!(summary.stats.cancelled, 1);
        assert_eq!(store.len(), 2);
        assert!(store.get(&target).is_none());
        assert_eq!(handle.state(&target), Some(TrialState::Cancelled));
    }

    #[test]
    fn cancelling_running_trial_releases_resources() {
        let trainable: Arc<dyn Trainable> = Arc::new(|ctx: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            let start = Instant::now();
            while !ctx.is_cancelled() && start.elapsed() < Duration::from_secs(5) {
                thread::sleep(Duration::from_millis(5));
            }
            anyhow::bail!("interrupted")
        });

        let (mut scheduler, store, ledger) = setup(1.0, 1);
        let batch = units(1, 1.0, trainable);
        let target = batch[0].id();
        scheduler.submit(batch).unwrap();

        let handle = scheduler.handle();
        let canceller = thread::spawn(move || {
            while handle.state(&target) != Some(TrialState::Running) {
                thread::sleep(Duration::from_millis(5));
            }
            handle.cancel(target);
        });
        scheduler.run().unwrap();
        canceller.join().unwrap();

        let outcome = store.get(&target).unwrap();
        assert_eq!(outcome.error().unwrap().kind, TrialErrorKind::Cancelled);
        assert_eq!(scheduler.state(&target), Some(TrialState::Cancelled));
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn cancel_all_before_run_leaves_store_empty() {
        let (mut scheduler, store, _) = setup(2.0, 2);
        scheduler.submit(units(4, 1.0, partition_metric())).unwrap();
        scheduler.handle().cancel_all();

        let summary = scheduler.run().unwrap();
        assert_eq!(summary.cancelled.len(), 4);
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_outcome_is_fatal_and_drains() {
        let (mut scheduler, store, ledger) = setup(2.0, 2);
        let batch = units(3, 1.0, partition_metric());
        let header = OutcomeHeader {
            trial_id: batch[0].id(),
            trial_number: 0,
            admission_seq: 0,
            params: ParameterSet::new(),
            attempts: 1,
            worker: None,
            started_at: chrono::Utc::now(),
        };
        store.record(TrialOutcome::succeeded(header, Metrics::new())).unwrap();
        scheduler.submit(batch).unwrap();

        let err = scheduler.run().unwrap_err();
        assert!(matches!(err, FoError::Store(_)));
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn runs_are_deterministic() {
        let run_once = || {
            let (mut scheduler, store, _) = setup(3.0, 3);
            scheduler.submit(units(12, 1.0, partition_metric())).unwrap();
            scheduler.run().unwrap();
            let mut results: Vec<(usize, Option<f64>)> = store
                .all()
                .iter()
                .map(|o| (o.trial_number, o.metric("mse")))
                .collect();
            results.sort_by_key(|(n, _)| *n);
            results
        };

        assert_eq!(run_once(), run_once());
    }

    #[test]
    fn timeout_is_recorded_as_failure() {
        let trainable: Arc<dyn Trainable> = Arc::new(|ctx: &TrialContext, _: &ParameterSet| -> anyhow::Result<Metrics> {
            while !ctx.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            anyhow::bail!("stopped")
        });
        let ledger = Arc::new(ResourceLedger::new(&ResourceRequest::cpus(1.0)));
        let store = Arc::new(ResultStore::new());
        let config = SchedulerConfig {
            workers: 1,
            trial_timeout: Some(Duration::from_millis(50)),
            max_retries: 0,
        };
        let mut scheduler = Scheduler::new(Arc::clone(&ledger), Arc::clone(&store), config);
        scheduler.submit(units(2, 1.0, trainable)).unwrap();
        let summary = scheduler.run().unwrap();

        assert_eq!(summary.stats.failed, 2);
        assert!(store
            .all()
            .iter()
            .all(|o| o.error().map(|e| e.kind) == Some(TrialErrorKind::TimedOut)));
        assert!(ledger.snapshot().is_idle());
    }
}
