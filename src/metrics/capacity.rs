//! Capacity collector: pool accounting events, in-flight, and utilization.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::budget::ResourceBudget;
use crate::core::capacity::PoolObserver;
use crate::metrics::sink::MetricsSink;

const EVENT_KINDS: [&str; 5] = ["accepted", "rejected", "released", "reset", "increment"];

struct CapacityState {
    ceiling: ResourceBudget,
    accepted: u64,
    rejected: u64,
    released: u64,
    resets: u64,
    increments: u64,
    /// Accepted minus released per dimension, floored at zero.
    in_flight: ResourceBudget,
    events: BTreeMap<&'static str, std::collections::VecDeque<Instant>>,
}

/// Subscribes to a pool's accounting events and maintains cumulative totals,
/// per-dimension in-flight and utilization, and rolling-window event rates.
///
/// Attach with `pool.add_observer(collector)`.
pub struct CapacityCollector {
    pool: String,
    window: Duration,
    state: Mutex<CapacityState>,
}

impl CapacityCollector {
    /// Create a collector for the named pool and its configured ceiling.
    /// Later `set_limits` events keep the ceiling in sync.
    #[must_use]
    pub fn new(pool: impl Into<String>, ceiling: ResourceBudget, window: Duration) -> Self {
        Self {
            pool: pool.into(),
            window,
            state: Mutex::new(CapacityState {
                ceiling,
                accepted: 0,
                rejected: 0,
                released: 0,
                resets: 0,
                increments: 0,
                in_flight: ResourceBudget::new(),
                events: BTreeMap::new(),
            }),
        }
    }

    fn record_event(&self, state: &mut CapacityState, kind: &'static str) {
        let now = Instant::now();
        let samples = state.events.entry(kind).or_default();
        samples.push_back(now);
        if let Some(cutoff) = now.checked_sub(self.window) {
            while samples.front().is_some_and(|at| *at < cutoff) {
                samples.pop_front();
            }
        }
    }

    /// Point-in-time snapshot. Does not mutate collector state.
    #[must_use]
    pub fn snapshot(&self) -> CapacitySnapshot {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);
        let state = self.state.lock();

        let in_flight: BTreeMap<String, i64> = state
            .in_flight
            .iter()
            .map(|(dim, amount)| (dim.to_string(), amount))
            .collect();

        let mut utilization = BTreeMap::new();
        for (dim, limit) in state.ceiling.iter() {
            if limit <= 0 {
                utilization.insert(dim.to_string(), 0.0);
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let ratio = state.in_flight.amount(dim) as f64 / limit as f64;
            utilization.insert(dim.to_string(), ratio);
        }

        let mut rates_per_sec = BTreeMap::new();
        for kind in EVENT_KINDS {
            let count = state.events.get(kind).map_or(0, |samples| {
                samples
                    .iter()
                    .filter(|at| cutoff.is_none_or(|c| **at >= c))
                    .count()
            });
            #[allow(clippy::cast_precision_loss)]
            let rate = count as f64 / self.window.as_secs_f64();
            rates_per_sec.insert(kind.to_string(), rate);
        }

        CapacitySnapshot {
            pool: self.pool.clone(),
            accepted: state.accepted,
            rejected: state.rejected,
            released: state.released,
            resets: state.resets,
            increments: state.increments,
            in_flight,
            utilization,
            rates_per_sec,
        }
    }

    /// Bridge the current snapshot into an external metrics sink.
    pub fn emit_to(&self, sink: &dyn MetricsSink) {
        let snapshot = self.snapshot();
        let pool = snapshot.pool.as_str();
        sink.counter("pool_acquire_accepted", snapshot.accepted, &[("pool", pool)]);
        sink.counter("pool_acquire_rejected", snapshot.rejected, &[("pool", pool)]);
        sink.counter("pool_released", snapshot.released, &[("pool", pool)]);
        for (dim, ratio) in &snapshot.utilization {
            sink.gauge(
                "pool_utilization",
                *ratio,
                &[("pool", pool), ("dim", dim.as_str())],
            );
        }
    }
}

impl PoolObserver for CapacityCollector {
    fn on_acquire_accepted(&self, _pool: &str, cost: &ResourceBudget) {
        let mut state = self.state.lock();
        state.accepted += 1;
        state.in_flight.accumulate(cost);
        self.record_event(&mut state, "accepted");
    }

    fn on_acquire_rejected(&self, _pool: &str, _cost: &ResourceBudget) {
        let mut state = self.state.lock();
        state.rejected += 1;
        self.record_event(&mut state, "rejected");
    }

    fn on_release(&self, _pool: &str, cost: &ResourceBudget) {
        let mut state = self.state.lock();
        state.released += 1;
        state.in_flight.deduct_floored(cost);
        self.record_event(&mut state, "released");
    }

    fn on_reset(&self, _pool: &str) {
        let mut state = self.state.lock();
        state.resets += 1;
        self.record_event(&mut state, "reset");
    }

    fn on_increment(&self, _pool: &str, _amount: &ResourceBudget) {
        let mut state = self.state.lock();
        state.increments += 1;
        self.record_event(&mut state, "increment");
    }

    fn on_set_limits(&self, _pool: &str, ceiling: &ResourceBudget) {
        self.state.lock().ceiling = ceiling.clone();
    }
}

/// Immutable, serializable capacity collector snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    /// Observed pool name.
    pub pool: String,
    /// Cumulative accepted acquisitions.
    pub accepted: u64,
    /// Cumulative rejected acquisitions.
    pub rejected: u64,
    /// Cumulative releases.
    pub released: u64,
    /// Cumulative hard resets.
    pub resets: u64,
    /// Cumulative gradual increments.
    pub increments: u64,
    /// Accepted minus released per dimension, floored at zero.
    pub in_flight: BTreeMap<String, i64>,
    /// Per-dimension `in_flight / ceiling`.
    pub utilization: BTreeMap<String, f64>,
    /// Rolling-window event rates per event kind.
    pub rates_per_sec: BTreeMap<String, f64>,
}
