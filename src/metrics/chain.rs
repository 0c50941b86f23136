//! Chain collector: turnstile pass counts and inter-checkpoint latency.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics::sink::MetricsSink;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ItemId {
    /// Explicit per-item key, for reordering pipelines.
    Key(String),
    /// Arrival index: the n-th pass at one checkpoint pairs with the n-th
    /// pass at every other.
    Seq(u64),
}

#[derive(Default)]
struct TurnstileState {
    passed: u64,
    fifo_seq: u64,
}

#[derive(Default)]
struct ChainState {
    turnstiles: BTreeMap<String, TurnstileState>,
    /// Passes per item identity, in checkpoint-arrival order.
    items: HashMap<ItemId, Vec<(String, Instant)>>,
    /// Latency samples per checkpoint edge, `(recorded_at, millis)`.
    latencies: BTreeMap<String, VecDeque<(Instant, f64)>>,
}

/// Tracks named turnstile pass counts and, when two turnstiles see the same
/// item (FIFO-paired or key-paired), inter-checkpoint latency distributions
/// over a rolling time window.
pub struct ChainCollector {
    window: Duration,
    state: Mutex<ChainState>,
}

impl ChainCollector {
    /// Create a collector with the given rolling window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Record one pass at `checkpoint`. `key` is `None` for FIFO pairing.
    ///
    /// Called by turnstile stages; not intended for direct use.
    pub fn record_pass(&self, checkpoint: &str, key: Option<String>) {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let turnstile = state.turnstiles.entry(checkpoint.to_string()).or_default();
        turnstile.passed += 1;
        let id = key.map_or_else(
            || {
                let seq = turnstile.fifo_seq;
                turnstile.fifo_seq += 1;
                ItemId::Seq(seq)
            },
            ItemId::Key,
        );

        let passes = state.items.entry(id).or_default();
        for (prev_checkpoint, prev_at) in passes.iter() {
            let edge = format!("{prev_checkpoint}->{checkpoint}");
            let millis = now.duration_since(*prev_at).as_secs_f64() * 1000.0;
            state
                .latencies
                .entry(edge)
                .or_default()
                .push_back((now, millis));
        }
        passes.push((checkpoint.to_string(), now));

        if let Some(cutoff) = now.checked_sub(self.window) {
            for samples in state.latencies.values_mut() {
                while samples.front().is_some_and(|(at, _)| *at < cutoff) {
                    samples.pop_front();
                }
            }
            state
                .items
                .retain(|_, passes| passes.last().is_some_and(|(_, at)| *at >= cutoff));
        }
    }

    /// Point-in-time snapshot. Does not mutate collector state.
    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);
        let state = self.state.lock();

        let turnstiles = state
            .turnstiles
            .iter()
            .map(|(name, t)| (name.clone(), TurnstileStats { passed: t.passed }))
            .collect();

        let mut latencies = BTreeMap::new();
        for (edge, samples) in &state.latencies {
            let in_window = samples
                .iter()
                .filter(|(at, _)| cutoff.is_none_or(|c| *at >= c))
                .map(|(_, millis)| *millis);
            let mut count = 0_u64;
            let mut min_ms = f64::MAX;
            let mut max_ms = 0.0_f64;
            let mut sum = 0.0_f64;
            for millis in in_window {
                count += 1;
                min_ms = min_ms.min(millis);
                max_ms = max_ms.max(millis);
                sum += millis;
            }
            if count > 0 {
                #[allow(clippy::cast_precision_loss)]
                let avg_ms = sum / count as f64;
                latencies.insert(
                    edge.clone(),
                    LatencyStats {
                        count,
                        min_ms,
                        max_ms,
                        avg_ms,
                    },
                );
            }
        }

        ChainSnapshot {
            turnstiles,
            latencies,
        }
    }

    /// Bridge the current snapshot into an external metrics sink.
    pub fn emit_to(&self, sink: &dyn MetricsSink) {
        let snapshot = self.snapshot();
        for (name, stats) in &snapshot.turnstiles {
            sink.counter("turnstile_passed", stats.passed, &[("checkpoint", name.as_str())]);
        }
        for (edge, stats) in &snapshot.latencies {
            sink.duration("checkpoint_latency_avg", stats.avg_ms, &[("edge", edge.as_str())]);
            sink.duration("checkpoint_latency_max", stats.max_ms, &[("edge", edge.as_str())]);
        }
    }
}

/// Pass statistics for one turnstile.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TurnstileStats {
    /// Items that passed this checkpoint since creation.
    pub passed: u64,
}

/// Latency distribution for one checkpoint edge within the rolling window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyStats {
    /// Samples inside the window.
    pub count: u64,
    /// Fastest observed pass, milliseconds.
    pub min_ms: f64,
    /// Slowest observed pass, milliseconds.
    pub max_ms: f64,
    /// Mean pass latency, milliseconds.
    pub avg_ms: f64,
}

/// Immutable, serializable chain collector snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSnapshot {
    /// Pass counts per turnstile name.
    pub turnstiles: BTreeMap<String, TurnstileStats>,
    /// Latency statistics per `"from->to"` checkpoint edge.
    pub latencies: BTreeMap<String, LatencyStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_pairing_produces_edge_latency() {
        let collector = ChainCollector::new(Duration::from_secs(60));
        collector.record_pass("in", None);
        collector.record_pass("out", None);
        collector.record_pass("in", None);
        collector.record_pass("out", None);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.turnstiles["in"].passed, 2);
        assert_eq!(snapshot.turnstiles["out"].passed, 2);
        assert_eq!(snapshot.latencies["in->out"].count, 2);
    }

    #[test]
    fn test_key_pairing_tolerates_reordering() {
        let collector = ChainCollector::new(Duration::from_secs(60));
        collector.record_pass("in", Some("a".into()));
        collector.record_pass("in", Some("b".into()));
        // Downstream sees them in the opposite order.
        collector.record_pass("out", Some("b".into()));
        collector.record_pass("out", Some("a".into()));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.latencies["in->out"].count, 2);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let collector = ChainCollector::new(Duration::from_secs(60));
        collector.record_pass("in", None);
        let first = collector.snapshot();
        let second = collector.snapshot();
        assert_eq!(first.turnstiles["in"], second.turnstiles["in"]);
    }
}
