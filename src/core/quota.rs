//! Quota capacity pools: consumption budgets that release does not restore.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::budget::ResourceBudget;
use crate::core::capacity::{
    deduct_all, lock_chain, CapacityPool, PoolObserver, PoolState, ResourceCapacityPool,
    SignalForwarder,
};
use crate::core::error::EngineError;
use crate::runtime::Spawn;
use crate::signal::WaitSignal;

/// A capacity pool modeling consumption quotas (e.g. calls per minute).
///
/// `release()` does **not** restore availability: consumed quota stays
/// consumed until an explicit [`reset`](Self::reset) (hard refill to the
/// ceiling, typically timer-driven) or [`increment`](Self::increment)
/// (token-bucket-style gradual refill bounded by a cap).
///
/// A quota pool may name a [`ResourceCapacityPool`] as parent, nesting a rate
/// limit under a concurrency budget; the parent is acquired atomically with
/// the quota and, unlike the quota, is restored on release.
pub struct QuotaCapacityPool {
    name: String,
    state: Mutex<PoolState>,
    parent: Option<Arc<ResourceCapacityPool>>,
    signal: Arc<WaitSignal>,
    observers: Mutex<Vec<Arc<dyn PoolObserver>>>,
    timer_running: Mutex<Option<Arc<AtomicBool>>>,
}

impl QuotaCapacityPool {
    /// Create a quota pool with `ceiling` fully available.
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
            timer_running: Mutex::new(None),
        }
    }

    /// Create a quota pool nested under a resource pool.
    #[must_use]
    pub fn with_parent(
        name: impl Into<String>,
        ceiling: ResourceBudget,
        parent: Arc<ResourceCapacityPool>,
    ) -> Self {
        let mut pool = Self::new(name, ceiling);
        parent.add_observer(Arc::new(SignalForwarder::new(Arc::clone(&pool.signal))));
        pool.parent = Some(parent);
        pool
    }

    /// Hard refill: availability returns to the full ceiling.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.available = state.ceiling.clone();
        }
        tracing::debug!(pool = %self.name, "quota reset");
        self.notify(|o| o.on_reset(&self.name));
        self.signal.signal();
    }

    /// Gradual refill: add `amount` per dimension, bounded by `cap` and by
    /// the configured ceiling.
    pub fn increment(&self, amount: &ResourceBudget, cap: &ResourceBudget) {
        {
            let mut state = self.state.lock();
            let ceiling = state.ceiling.clone();
            state.available.restore_capped(amount, cap);
            state.available.cap_at(&ceiling);
        }
        tracing::debug!(pool = %self.name, amount = ?amount, "quota incremented");
        self.notify(|o| o.on_increment(&self.name, amount));
        self.signal.signal();
    }

    /// Start a periodic reset timer: every `period`, the quota is hard
    /// refilled, modeling a fixed-window rate limit. Restarting replaces any
    /// running timer. Timer lifecycle is independent of task execution.
    ///
    /// Takes an owned handle: `Arc::clone(&pool).start_reset_timer(..)`.
    pub fn start_reset_timer<S: Spawn>(self: Arc<Self>, period: Duration, spawner: &S) {
        let running = Arc::new(AtomicBool::new(true));
        if let Some(previous) = self.timer_running.lock().replace(Arc::clone(&running)) {
            previous.store(false, Ordering::Release);
        }
        let pool = self;
        tracing::info!(pool = %pool.name, period_ms = period.as_millis() as u64, "reset timer started");
        spawner.spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if !running.load(Ordering::Acquire) {
                    tracing::debug!(pool = %pool.name, "reset timer stopped");
                    break;
                }
                pool.reset();
            }
        });
    }

    /// Stop the periodic reset timer, if one is running.
    pub fn stop_reset_timer(&self) {
        if let Some(running) = self.timer_running.lock().take() {
            running.store(false, Ordering::Release);
            tracing::info!(pool = %self.name, "reset timer stopping");
        }
    }

    fn parent_chain(&self) -> Vec<&ResourceCapacityPool> {
        self.parent.as_deref().map_or_else(Vec::new, |p| p.chain())
    }

    fn notify(&self, f: impl Fn(&dyn PoolObserver)) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            f(observer.as_ref());
        }
    }
}

impl CapacityPool for QuotaCapacityPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_acquire(&self, cost: &ResourceBudget) -> bool {
        self.state.lock().available.covers(cost)
            && self
                .parent_chain()
                .iter()
                .all(|pool| pool.lock_state().available.covers_tracked(cost))
    }

    fn try_acquire(&self, cost: &ResourceBudget) -> Result<ResourceBudget, EngineError> {
        let parents = self.parent_chain();
        let mut own = self.state.lock();
        let mut parent_guards = lock_chain(&parents);

        if !own.available.covers(cost) {
            drop(parent_guards);
            drop(own);
            tracing::debug!(pool = %self.name, "quota rejected");
            self.notify(|o| o.on_acquire_rejected(&self.name, cost));
            return Err(EngineError::AcquisitionRejected {
                pool: self.name.clone(),
                reason: "quota exhausted".into(),
            });
        }
        if let Err(pos) = deduct_all(&mut parent_guards, cost, false) {
            let rejected_by = parents[pos].name().to_string();
            drop(parent_guards);
            drop(own);
            tracing::debug!(pool = %self.name, rejected_by = %rejected_by, "parent rejected");
            self.notify(|o| o.on_acquire_rejected(&self.name, cost));
            return Err(EngineError::AcquisitionRejected {
                pool: rejected_by,
                reason: "insufficient availability".into(),
            });
        }
        own.available.deduct(cost);
        let remaining = own.available.clone();
        drop(parent_guards);
        drop(own);

        tracing::debug!(pool = %self.name, "quota accepted");
        self.notify(|o| o.on_acquire_accepted(&self.name, cost));
        for pool in &parents {
            pool.notify(|o| o.on_acquire_accepted(pool.name(), cost));
        }
        Ok(remaining)
    }

    fn acquire_immediate(&self, cost: &ResourceBudget) {
        {
            let mut own = self.state.lock();
            let mut parent_guards = lock_chain(&self.parent_chain());
            own.available.deduct(cost);
            for guard in &mut parent_guards {
                guard.available.deduct(cost);
            }
        }
        tracing::debug!(pool = %self.name, "immediate quota acquisition");
        self.notify(|o| o.on_acquire_accepted(&self.name, cost));
    }

    /// Consumed quota is not returned: this restores only the parent chain.
    fn release(&self, cost: &ResourceBudget) {
        if let Some(parent) = &self.parent {
            parent.release(cost);
        }
    }

    fn set_limits(&self, ceiling: ResourceBudget) {
        self.state.lock().apply_limits(ceiling.clone());
        tracing::info!(pool = %self.name, ceiling = ?ceiling, "quota limits updated");
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
