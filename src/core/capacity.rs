//! Resource capacity pools with atomic multi-dimension acquisition.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::budget::ResourceBudget;
use crate::core::error::EngineError;
use crate::signal::WaitSignal;

/// Observer attached to a pool, receiving every accounting event.
///
/// All methods default to no-ops so implementations subscribe only to the
/// events they care about.
pub trait PoolObserver: Send + Sync {
    /// An acquisition succeeded and `cost` was deducted.
    fn on_acquire_accepted(&self, _pool: &str, _cost: &ResourceBudget) {}
    /// An acquisition was rejected for insufficient availability.
    fn on_acquire_rejected(&self, _pool: &str, _cost: &ResourceBudget) {}
    /// `cost` was released back into the pool.
    fn on_release(&self, _pool: &str, _cost: &ResourceBudget) {}
    /// The pool was hard-refilled to its ceiling.
    fn on_reset(&self, _pool: &str) {}
    /// The pool was gradually refilled by `amount`.
    fn on_increment(&self, _pool: &str, _amount: &ResourceBudget) {}
    /// The pool ceiling was replaced.
    fn on_set_limits(&self, _pool: &str, _ceiling: &ResourceBudget) {}
}

/// Forwards availability-changing events from a parent pool into a child
/// pool's wait signal, so a waiter suspended on the child is woken when the
/// parent frees capacity.
pub(crate) struct SignalForwarder {
    signal: Arc<WaitSignal>,
}

impl SignalForwarder {
    pub(crate) const fn new(signal: Arc<WaitSignal>) -> Self {
        Self { signal }
    }
}

impl PoolObserver for SignalForwarder {
    fn on_release(&self, _pool: &str, _cost: &ResourceBudget) {
        self.signal.signal();
    }
    fn on_reset(&self, _pool: &str) {
        self.signal.signal();
    }
    fn on_increment(&self, _pool: &str, _amount: &ResourceBudget) {
        self.signal.signal();
    }
    fn on_set_limits(&self, _pool: &str, _ceiling: &ResourceBudget) {
        self.signal.signal();
    }
}

/// Common surface of resource and quota pools.
///
/// The scheduled task runner and the admin API operate on pools only through
/// this trait.
pub trait CapacityPool: Send + Sync {
    /// Pool name, unique within a registry.
    fn name(&self) -> &str;
    /// Pure check: would `try_acquire(cost)` succeed right now? No mutation.
    fn can_acquire(&self, cost: &ResourceBudget) -> bool;
    /// Atomic check-and-deduct across all cost dimensions and all ancestor
    /// pools. Either every dimension at every level is deducted or none are.
    /// On success, returns the local remaining availability.
    fn try_acquire(&self, cost: &ResourceBudget) -> Result<ResourceBudget, EngineError>;
    /// Deduct unconditionally, even past zero. Models externally imposed
    /// reservations; never wakes or rejects.
    fn acquire_immediate(&self, cost: &ResourceBudget);
    /// Return `cost` to the pool, bounded by the ceiling. A no-op on quota
    /// pools (the parent chain, if any, is still restored).
    fn release(&self, cost: &ResourceBudget);
    /// Replace the ceiling. In-flight usage is preserved: holders are never
    /// evicted; lowering below current usage only gates future acquisitions.
    fn set_limits(&self, ceiling: ResourceBudget);
    /// Snapshot of the local available budget.
    fn available(&self) -> ResourceBudget;
    /// Snapshot of the local ceiling.
    fn ceiling(&self) -> ResourceBudget;
    /// Per-dimension `in_flight / ceiling`, clamped non-negative.
    fn utilization(&self) -> BTreeMap<String, f64>;
    /// The gate a scheduler suspends on when this pool rejects a cost.
    /// Signaled by any release/reset/increment/set-limits that may change
    /// availability, here or in an ancestor.
    fn signal(&self) -> Arc<WaitSignal>;
    /// Attach an observer receiving this pool's accounting events.
    fn add_observer(&self, observer: Arc<dyn PoolObserver>);
}

/// Mutable accounting state shared by pool implementations.
pub(crate) struct PoolState {
    pub(crate) ceiling: ResourceBudget,
    pub(crate) available: ResourceBudget,
}

impl PoolState {
    /// Recompute availability for a new ceiling, preserving in-flight usage.
    pub(crate) fn apply_limits(&mut self, ceiling: ResourceBudget) {
        let mut available = ResourceBudget::new();
        for (dim, limit) in ceiling.iter() {
            let in_flight = if self.ceiling.has_dim(dim) {
                self.ceiling.amount(dim) - self.available.amount(dim)
            } else {
                0
            };
            available = available.with(dim, limit - in_flight);
        }
        self.ceiling = ceiling;
        self.available = available;
    }
}

/// A named multi-dimensional capacity budget where releasing restores what
/// acquiring deducted.
///
/// A pool may have a parent; acquisition must then succeed against both the
/// local and every ancestor budget atomically, or it succeeds nowhere. All
/// mutation happens under per-pool `parking_lot` mutexes, locked child-first
/// along the parent chain so concurrent acquisitions cannot deadlock.
pub struct ResourceCapacityPool {
    name: String,
    state: Mutex<PoolState>,
    parent: Option<Arc<ResourceCapacityPool>>,
    signal: Arc<WaitSignal>,
    observers: Mutex<Vec<Arc<dyn PoolObserver>>>,
}

impl ResourceCapacityPool {
    /// Create a root pool with `ceiling` fully available.
    #[must_use]
    pub fn new(name: impl Into<String>, ceiling: ResourceBudget) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PoolState {
                available: ceiling.clone(),
                ceiling,
            }),
            parent: None,
            signal: Arc::new(WaitSignal::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Create a child pool. Every acquisition checks this pool and all
    /// ancestors atomically; a failure at either level fails the whole
    /// attempt with no partial deduction.
    #[must_use]
    pub fn with_parent(
        name: impl Into<String>,
        ceiling: ResourceBudget,
        parent: Arc<Self>,
    ) -> Self {
        let mut pool = Self::new(name, ceiling);
        // Availability changes in the parent must wake waiters parked on the
        // child's signal.
        parent.add_observer(Arc::new(SignalForwarder::new(Arc::clone(&pool.signal))));
        pool.parent = Some(parent);
        pool
    }

    /// The pool chain from this pool up to the root.
    pub(crate) fn chain(&self) -> Vec<&Self> {
        let mut chain = vec![self];
        let mut cur = self;
        while let Some(parent) = cur.parent.as_deref() {
            chain.push(parent);
            cur = parent;
        }
        chain
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    pub(crate) fn notify(&self, f: impl Fn(&dyn PoolObserver)) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            f(observer.as_ref());
        }
    }
}

/// Lock a pool chain child-first, returning the guards in chain order.
pub(crate) fn lock_chain<'a>(
    chain: &[&'a ResourceCapacityPool],
) -> Vec<MutexGuard<'a, PoolState>> {
    chain.iter().map(|pool| pool.lock_state()).collect()
}

/// Check every guard covers `cost`, then deduct from all - or deduct from
/// none. With `strict_first`, the first guard (the entry pool) must track
/// every cost dimension; ancestors always enforce only the dimensions they
/// track. Returns the index of the first pool that could not cover the cost.
pub(crate) fn deduct_all(
    guards: &mut [MutexGuard<'_, PoolState>],
    cost: &ResourceBudget,
    strict_first: bool,
) -> Result<(), usize> {
    for (idx, guard) in guards.iter().enumerate() {
        let ok = if idx == 0 && strict_first {
            guard.available.covers(cost)
        } else {
            guard.available.covers_tracked(cost)
        };
        if !ok {
            return Err(idx);
        }
    }
    for guard in guards.iter_mut() {
        guard.available.deduct(cost);
    }
    Ok(())
}

impl CapacityPool for ResourceCapacityPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_acquire(&self, cost: &ResourceBudget) -> bool {
        self.chain().iter().enumerate().all(|(idx, pool)| {
            let state = pool.lock_state();
            if idx == 0 {
                state.available.covers(cost)
            } else {
                state.available.covers_tracked(cost)
            }
        })
    }

    fn try_acquire(&self, cost: &ResourceBudget) -> Result<ResourceBudget, EngineError> {
        let chain = self.chain();
        let mut guards = lock_chain(&chain);
        match deduct_all(&mut guards, cost, true) {
            Ok(()) => {
                let remaining = guards[0].available.clone();
                drop(guards);
                tracing::debug!(pool = %self.name, "acquisition accepted");
                for pool in &chain {
                    pool.notify(|o| o.on_acquire_accepted(&pool.name, cost));
                }
                Ok(remaining)
            }
            Err(pos) => {
                let rejected_by = chain[pos].name.clone();
                drop(guards);
                tracing::debug!(pool = %self.name, rejected_by = %rejected_by, "acquisition rejected");
                self.notify(|o| o.on_acquire_rejected(&self.name, cost));
                Err(EngineError::AcquisitionRejected {
                    pool: rejected_by,
                    reason: "insufficient availability".into(),
                })
            }
        }
    }

    fn acquire_immediate(&self, cost: &ResourceBudget) {
        let chain = self.chain();
        let mut guards = lock_chain(&chain);
        for guard in &mut guards {
            guard.available.deduct(cost);
        }
        drop(guards);
        tracing::debug!(pool = %self.name, "immediate acquisition");
        for pool in &chain {
            pool.notify(|o| o.on_acquire_accepted(&pool.name, cost));
        }
    }

    fn release(&self, cost: &ResourceBudget) {
        {
            let mut state = self.state.lock();
            let ceiling = state.ceiling.clone();
            state.available.restore_capped(cost, &ceiling);
        }
        tracing::debug!(pool = %self.name, "released");
        self.notify(|o| o.on_release(&self.name, cost));
        self.signal.signal();
        if let Some(parent) = &self.parent {
            parent.release(cost);
        }
    }

    fn set_limits(&self, ceiling: ResourceBudget) {
        self.state.lock().apply_limits(ceiling.clone());
        tracing::info!(pool = %self.name, ceiling = ?ceiling, "limits updated");
        self.notify(|o| o.on_set_limits(&self.name, &ceiling));
        self.signal.signal();
    }

    fn available(&self) -> ResourceBudget {
        self.state.lock().available.clone()
    }

    fn ceiling(&self) -> ResourceBudget {
        self.state.lock().ceiling.clone()
    }

    fn utilization(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        state.available.utilization_against(&state.ceiling)
    }

    fn signal(&self) -> Arc<WaitSignal> {
        Arc::clone(&self.signal)
    }

    fn add_observer(&self, observer: Arc<dyn PoolObserver>) {
        self.observers.lock().push(observer);
    }
}
