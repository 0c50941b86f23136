//! Integration tests for the metrics collectors and sink contract.

use std::sync::Arc;
use std::time::Duration;

use prometheus_conduit::core::{CapacityPool, PoolObserver, ResourceBudget, ResourceCapacityPool};
use prometheus_conduit::metrics::{CapacityCollector, ChainCollector, MetricsSink, TracingMetricsSink};
use prometheus_conduit::stream::{PushPipeline, PushSink, VecSink};

fn slots(n: i64) -> ResourceBudget {
    ResourceBudget::new().with("slots", n)
}

#[tokio::test]
async fn test_turnstiles_around_half_dropping_filter() {
    // Spec scenario: turnstile "A", a filter dropping exactly half of 100
    // items, turnstile "B": A sees 100 passes, B sees 50.
    let collector = Arc::new(ChainCollector::new(Duration::from_secs(60)));
    let sink = VecSink::<u32>::new();

    let pipeline = PushPipeline::new(sink.clone()).turnstile("B", Arc::clone(&collector));
    let (pipeline, _handle) = pipeline.filter(|item: &u32| item % 2 == 0);
    let mut entry = pipeline
        .turnstile("A", Arc::clone(&collector))
        .into_sink();

    for i in 0..100 {
        entry.accept(i).await.unwrap();
    }
    entry.finish().await.unwrap();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.turnstiles["A"].passed, 100);
    assert_eq!(snapshot.turnstiles["B"].passed, 50);
    assert_eq!(sink.len(), 50);
}

#[tokio::test]
async fn test_chain_collector_reports_edge_latency() {
    let collector = Arc::new(ChainCollector::new(Duration::from_secs(60)));
    for _ in 0..5 {
        collector.record_pass("in", None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        collector.record_pass("out", None);
    }

    let snapshot = collector.snapshot();
    let stats = &snapshot.latencies["in->out"];
    assert_eq!(stats.count, 5);
    assert!(stats.min_ms >= 5.0, "min {} too small", stats.min_ms);
    assert!(stats.avg_ms >= stats.min_ms && stats.avg_ms <= stats.max_ms);
}

#[test]
fn test_capacity_collector_tracks_pool_events() {
    let pool = ResourceCapacityPool::new("gpu", slots(2));
    let collector = Arc::new(CapacityCollector::new(
        "gpu",
        slots(2),
        Duration::from_secs(60),
    ));
    pool.add_observer(Arc::clone(&collector) as Arc<dyn PoolObserver>);

    pool.try_acquire(&slots(1)).unwrap();
    pool.try_acquire(&slots(1)).unwrap();
    assert!(pool.try_acquire(&slots(1)).is_err());

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.accepted, 2);
    assert_eq!(snapshot.rejected, 1);
    assert_eq!(snapshot.in_flight["slots"], 2);
    assert!((snapshot.utilization["slots"] - 1.0).abs() < f64::EPSILON);
    assert!(snapshot.rates_per_sec["accepted"] > 0.0);

    pool.release(&slots(1));
    let snapshot = collector.snapshot();
    assert_eq!(snapshot.released, 1);
    assert_eq!(snapshot.in_flight["slots"], 1);
    assert!((snapshot.utilization["slots"] - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_capacity_collector_in_flight_floors_at_zero() {
    let collector = CapacityCollector::new("gpu", slots(2), Duration::from_secs(60));
    // A release with no matching acquisition must not drive in-flight
    // negative.
    collector.on_release("gpu", &slots(1));
    let snapshot = collector.snapshot();
    assert_eq!(snapshot.in_flight["slots"], 0);
}

#[test]
fn test_capacity_collector_follows_limit_updates() {
    let pool = ResourceCapacityPool::new("gpu", slots(2));
    let collector = Arc::new(CapacityCollector::new(
        "gpu",
        slots(2),
        Duration::from_secs(60),
    ));
    pool.add_observer(Arc::clone(&collector) as Arc<dyn PoolObserver>);

    pool.try_acquire(&slots(2)).unwrap();
    pool.set_limits(slots(4));

    let snapshot = collector.snapshot();
    assert!((snapshot.utilization["slots"] - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_snapshots_serialize() {
    let chain = ChainCollector::new(Duration::from_secs(60));
    chain.record_pass("in", None);
    let json = serde_json::to_string(&chain.snapshot()).unwrap();
    assert!(json.contains("\"in\""));

    let capacity = CapacityCollector::new("gpu", slots(2), Duration::from_secs(60));
    let json = serde_json::to_string(&capacity.snapshot()).unwrap();
    assert!(json.contains("\"gpu\""));
}

/// Recording sink capturing every bridged measurement.
#[derive(Default)]
struct RecordingSink {
    entries: parking_lot::Mutex<Vec<String>>,
}

impl MetricsSink for RecordingSink {
    fn counter(&self, name: &str, delta: u64, attrs: &[(&str, &str)]) {
        self.entries
            .lock()
            .push(format!("counter:{name}={delta}:{attrs:?}"));
    }

    fn gauge(&self, name: &str, value: f64, attrs: &[(&str, &str)]) {
        self.entries
            .lock()
            .push(format!("gauge:{name}={value}:{attrs:?}"));
    }

    fn duration(&self, name: &str, millis: f64, attrs: &[(&str, &str)]) {
        self.entries
            .lock()
            .push(format!("duration:{name}={millis}:{attrs:?}"));
    }
}

#[test]
fn test_collectors_bridge_into_metrics_sink() {
    let sink = RecordingSink::default();

    let pool = ResourceCapacityPool::new("gpu", slots(2));
    let collector = Arc::new(CapacityCollector::new(
        "gpu",
        slots(2),
        Duration::from_secs(60),
    ));
    pool.add_observer(Arc::clone(&collector) as Arc<dyn PoolObserver>);
    pool.try_acquire(&slots(1)).unwrap();
    collector.emit_to(&sink);

    let chain = ChainCollector::new(Duration::from_secs(60));
    chain.record_pass("in", None);
    chain.record_pass("out", None);
    chain.emit_to(&sink);

    // The tracing-backed sink is the no-setup default; a smoke emit must
    // not panic.
    collector.emit_to(&TracingMetricsSink);

    let entries = sink.entries.lock();
    assert!(entries.iter().any(|e| e.starts_with("counter:pool_acquire_accepted=1")));
    assert!(entries.iter().any(|e| e.starts_with("gauge:pool_utilization")));
    assert!(entries.iter().any(|e| e.starts_with("counter:turnstile_passed=1")));
    assert!(entries.iter().any(|e| e.starts_with("duration:checkpoint_latency_avg")));
}
