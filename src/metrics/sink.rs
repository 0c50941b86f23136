//! External metrics sink contract.

/// Bridge from collector snapshots into an external observability backend.
///
/// Attribute slices are `(key, value)` pairs qualifying the measurement
/// (checkpoint name, pool name, dimension, ...).
pub trait MetricsSink: Send + Sync {
    /// Add `delta` to a monotonic counter.
    fn counter(&self, name: &str, delta: u64, attrs: &[(&str, &str)]);
    /// Record the current value of a gauge.
    fn gauge(&self, name: &str, value: f64, attrs: &[(&str, &str)]);
    /// Record an observed duration in milliseconds.
    fn duration(&self, name: &str, millis: f64, attrs: &[(&str, &str)]);
}

/// Metrics sink that logs every measurement through `tracing`. Useful as a
/// default backend in development.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter(&self, name: &str, delta: u64, attrs: &[(&str, &str)]) {
        tracing::info!(metric = name, delta, ?attrs, "counter");
    }

    fn gauge(&self, name: &str, value: f64, attrs: &[(&str, &str)]) {
        tracing::info!(metric = name, value, ?attrs, "gauge");
    }

    fn duration(&self, name: &str, millis: f64, attrs: &[(&str, &str)]) {
        tracing::info!(metric = name, millis, ?attrs, "duration");
    }
}
