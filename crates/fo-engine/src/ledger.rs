//! Resource ledger: admission control over a fixed pool of abstract
//! resources.
//!
//! All quantities are tracked in milli-units behind a single mutex, so every
//! caller observes either the state before or after an acquire/release,
//! never a partial update. `allocated <= capacity` holds for every kind at
//! all times.

use fo_types::{LedgerError, ResourceRequest, MILLI};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, trace};

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub capacity: ResourceRequest,
    pub allocated: ResourceRequest,
}

impl LedgerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.allocated.iter().all(|(_, q)| q == 0.0)
    }
}

#[derive(Debug)]
pub struct ResourceLedger {
    capacity: BTreeMap<String, u64>,
    allocated: Mutex<BTreeMap<String, u64>>,
}

impl ResourceLedger {
    pub fn new(capacity: &ResourceRequest) -> Self {
        let capacity = capacity.to_milli();
        let allocated = capacity.keys().map(|k| (k.clone(), 0)).collect();
        Self {
            capacity,
            allocated: Mutex::new(allocated),
        }
    }

    /// Whether `request` could be admitted with nothing else allocated.
    pub fn fits_capacity(&self, request: &ResourceRequest) -> bool {
        request
            .to_milli()
            .iter()
            .all(|(kind, q)| self.capacity.get(kind).is_some_and(|cap| q <= cap))
    }

    /// Allocate `request` if every kind has room; otherwise change nothing.
    /// A sum that would overflow counts as not fitting.
    pub fn try_acquire(&self, request: &ResourceRequest) -> bool {
        let wanted = request.to_milli();
        let mut allocated = self.allocated.lock();

        let fits = wanted.iter().all(|(kind, q)| {
            match (self.capacity.get(kind), allocated.get(kind)) {
                (Some(cap), Some(used)) => used.checked_add(*q).is_some_and(|total| total <= *cap),
                _ => false,
            }
        });
        if !fits {
            return false;
        }

        for (kind, q) in &wanted {
            if let Some(used) = allocated.get_mut(kind) {
                *used += q;
            }
        }
        trace!(request = %request, "acquired resources");
        true
    }

    /// Return a previously acquired amount. Releasing more than is allocated
    /// is an invariant violation and leaves the ledger untouched.
    pub fn release(&self, request: &ResourceRequest) -> Result<(), LedgerError> {
        let returned = request.to_milli();
        let mut allocated = self.allocated.lock();

        for (kind, q) in &returned {
            let used = allocated.get(kind).ok_or_else(|| LedgerError::UnknownKind {
                kind: kind.clone(),
            })?;
            if q > used {
                return Err(LedgerError::ReleaseExceedsAllocated {
                    kind: kind.clone(),
                    requested: *q as f64 / MILLI,
                    allocated: *used as f64 / MILLI,
                });
            }
        }

        for (kind, q) in &returned {
            if let Some(used) = allocated.get_mut(kind) {
                *used -= q;
            }
        }
        trace!(request = %request, "released resources");
        Ok(())
    }

    /// Acquire and wrap the allocation in a guard that releases it exactly
    /// once, on [`Lease::release`] or on drop.
    pub fn try_lease(self: &Arc<Self>, request: &ResourceRequest) -> Option<Lease> {
        if self.try_acquire(request) {
            Some(Lease {
                ledger: Arc::clone(self),
                request: request.clone(),
                released: false,
            })
        } else {
            None
        }
    }

    pub fn available(&self, kind: &str) -> f64 {
        let allocated = self.allocated.lock();
        match (self.capacity.get(kind), allocated.get(kind)) {
            (Some(cap), Some(used)) => (cap - used) as f64 / MILLI,
            _ => 0.0,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let allocated = self.allocated.lock();
        LedgerSnapshot {
            capacity: to_request(&self.capacity),
            allocated: to_request(&allocated),
        }
    }
}

fn to_request(milli: &BTreeMap<String, u64>) -> ResourceRequest {
    milli
        .iter()
        .map(|(kind, q)| (kind.clone(), *q as f64 / MILLI))
        .collect()
}

/// An admitted unit's hold on the ledger.
#[derive(Debug)]
pub struct Lease {
    ledger: Arc<ResourceLedger>,
    request: ResourceRequest,
    released: bool,
}

impl Lease {
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    pub fn release(mut self) -> Result<(), LedgerError> {
        self.released = true;
        self.ledger.release(&self.request)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.ledger.release(&self.request) {
            error!("lease release failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fo_types::{CPU, GPU};
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn ledger(cpus: f64) -> Arc<ResourceLedger> {
        Arc::new(ResourceLedger::new(&ResourceRequest::cpus(cpus)))
    }

    #[test]
    fn acquire_until_full_then_release() {
        let ledger = ledger(4.0);
        let two = ResourceRequest::cpus(2.0);

        assert!(ledger.try_acquire(&two));
        assert!(ledger.try_acquire(&two));
        assert!(!ledger.try_acquire(&two));
        assert_eq!(ledger.available(CPU), 0.0);

        ledger.release(&two).unwrap();
        assert_eq!(ledger.available(CPU), 2.0);
        assert!(ledger.try_acquire(&two));
    }

    #[test]
    fn failed_acquire_has_no_effect() {
        let ledger = Arc::new(ResourceLedger::new(
            &ResourceRequest::cpus(4.0).with(GPU, 1.0),
        ));
        let request = ResourceRequest::cpus(1.0).with(GPU, 2.0);

        assert!(!ledger.try_acquire(&request));
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn unknown_kind_never_fits() {
        let ledger = ledger(4.0);
        let request = ResourceRequest::cpus(1.0).with(GPU, 1.0);
        assert!(!ledger.fits_capacity(&request));
        assert!(!ledger.try_acquire(&request));
    }

    #[test]
    fn release_without_acquire_is_invariant_violation() {
        let ledger = ledger(4.0);
        let err = ledger.release(&ResourceRequest::cpus(1.0)).unwrap_err();
        assert!(matches!(err, LedgerError::ReleaseExceedsAllocated { .. }));

        let err = ledger
            .release(&ResourceRequest::new().with(GPU, 1.0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKind { .. }));
    }

    #[test]
    fn fractional_requests_account_exactly() {
        let ledger = ledger(1.0);
        let tenth = ResourceRequest::cpus(0.1);
        for _ in 0..10 {
            assert!(ledger.try_acquire(&tenth));
        }
        assert!(!ledger.try_acquire(&tenth));
        for _ in 0..10 {
            ledger.release(&tenth).unwrap();
        }
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn tiny_requests_still_cost_capacity() {
        let ledger = ledger(1.0);
        let tiny = ResourceRequest::cpus(0.0004);
        let admitted = (0..100_000).filter(|_| ledger.try_acquire(&tiny)).count();

        assert_eq!(admitted, 1_000);
        assert_eq!(ledger.available(CPU), 0.0);
    }

    #[test]
    fn huge_requests_do_not_overflow() {
        let ledger = ledger(1e17);
        let huge = ResourceRequest::cpus(1e16);

        assert!(ledger.try_acquire(&huge));
        assert!(!ledger.try_acquire(&huge));
        ledger.release(&huge).unwrap();
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn lease_releases_exactly_once() {
        let ledger = ledger(2.0);
        let request = ResourceRequest::cpus(2.0);

        let lease = ledger.try_lease(&request).unwrap();
        assert!(ledger.try_lease(&request).is_none());
        lease.release().unwrap();
        assert!(ledger.snapshot().is_idle());

        {
            let _lease = ledger.try_lease(&request).unwrap();
        }
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn lease_released_on_panic() {
        let ledger = ledger(1.0);
        let inner = Arc::clone(&ledger);
        let result = thread::spawn(move || {
            let _lease = inner.try_lease(&ResourceRequest::cpus(1.0)).unwrap();
            panic!("trial blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(ledger.snapshot().is_idle());
    }

    #[test]
    fn concurrent_fuzz_never_exceeds_capacity() {
        let ledger = ledger(8.0);
        let violated = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let violated = Arc::clone(&violated);
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    let mut held = Vec::new();
                    for _ in 0..2_000 {
                        if held.is_empty() || rng.random_bool(0.6) {
                            let request = ResourceRequest::cpus(rng.random_range(1..=4) as f64 * 0.5);
                            if ledger.try_acquire(&request) {
                                held.push(request);
                            }
                        } else {
                            let idx = rng.random_range(0..held.len());
                            let request = held.swap_remove(idx);
                            ledger.release(&request).unwrap();
                        }
                        let snap = ledger.snapshot();
                        if snap.allocated.get(CPU) > snap.capacity.get(CPU) {
                            violated.store(true, Ordering::SeqCst);
                        }
                    }
                    for request in held {
                        ledger.release(&request).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!violated.load(Ordering::SeqCst));
        assert!(ledger.snapshot().is_idle());
    }
}
