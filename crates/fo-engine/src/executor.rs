//! Runs a single trial in isolation and turns whatever happens into exactly
//! one [`TrialOutcome`].

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use fo_types::{Metrics, OutcomeHeader, TrialError, TrialErrorKind, TrialOutcome};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::unit::{TrialContext, TrialUnit};

/// How often a waiting executor checks the cancel token and deadline.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Execution policy shared by all workers.
#[derive(Debug, Clone)]
pub struct TrialExecutor {
    timeout: Option<Duration>,
    max_retries: u32,
    poll_interval: Duration,
}

impl Default for TrialExecutor {
    fn default() -> Self {
        Self::new(None, 0)
    }
}

impl TrialExecutor {
    pub fn new(timeout: Option<Duration>, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run `unit` to completion. Never panics and never returns an error:
    /// failures of the trainable are captured in the outcome.
    pub fn execute(&self, unit: &TrialUnit, admission_seq: u64, ctx: &TrialContext) -> TrialOutcome {
        let started_at = Utc::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            if ctx.is_cancelled() {
                break Err(TrialError::new(
                    TrialErrorKind::Cancelled,
                    "cancelled before start",
                ));
            }

            match self.run_attempt(unit, &ctx.for_attempt(attempts)) {
                Ok(metrics) => break Ok(metrics),
                Err(e) if e.kind.is_retryable() && attempts <= self.max_retries => {
                    warn!(trial = %unit.id(), attempt = attempts, "trial attempt failed, retrying: {}", e);
                }
                Err(e) => break Err(e),
            }
        };

        let header = OutcomeHeader {
            trial_id: unit.id(),
            trial_number: unit.trial_number(),
            admission_seq,
            params: unit.params().clone(),
            attempts,
            worker: Some(ctx.worker.clone()),
            started_at,
        };

        match result {
            Ok(metrics) => {
                debug!(trial = %unit.id(), attempts, "trial succeeded");
                TrialOutcome::succeeded(header, metrics)
            }
            Err(error) => {
                warn!(trial = %unit.id(), attempts, "trial failed: {}", error);
                TrialOutcome::failed(header, error)
            }
        }
    }

    fn run_attempt(&self, unit: &TrialUnit, ctx: &TrialContext) -> Result<Metrics, TrialError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let trainable = unit.trainable();
        let params = unit.shared_params();
        let thread_ctx = ctx.clone();

        let spawned = thread::Builder::new()
            .name(format!("trial-{}", unit.trial_number()))
            .spawn(move || {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| trainable.train(&thread_ctx, &params)));
                // The executor may have given up on this attempt already.
                let _ = tx.send(result);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Err(TrialError::new(
                    TrialErrorKind::Raised,
                    format!("failed to spawn trial thread: {e}"),
                ))
            }
        };

        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            let wait = match deadline {
                Some(d) => d
                    .saturating_duration_since(Instant::now())
                    .min(self.poll_interval),
                None => self.poll_interval,
            };

            match rx.recv_timeout(wait) {
                Ok(result) => {
                    let _ = handle.join();
                    return match result {
                        Ok(Ok(metrics)) => Ok(metrics),
                        Ok(Err(_)) if ctx.is_cancelled() => Err(TrialError::new(
                            TrialErrorKind::Cancelled,
                            "stopped after cancellation",
                        )),
                        Ok(Err(err)) => Err(TrialError::new(TrialErrorKind::Raised, format!("{err:#}"))),
                        Err(payload) => Err(TrialError::new(
                            TrialErrorKind::Panicked,
                            panic_message(payload.as_ref()),
                        )),
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    if ctx.is_cancelled() {
                        return Err(TrialError::new(
                            TrialErrorKind::Cancelled,
                            "cancelled while running",
                        ));
                    }
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            // Ask a cooperative trainable to stop; the thread is detached.
                            ctx.cancel_token().cancel();
                            return Err(TrialError::new(
                                TrialErrorKind::TimedOut,
                                format!("exceeded {:?}", self.timeout.unwrap_or_default()),
                            ));
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TrialError::new(
                        TrialErrorKind::Panicked,
                        "trial thread exited without reporting",
                    ));
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "trial panicked".to_string()
    }
}
