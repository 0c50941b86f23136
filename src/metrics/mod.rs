//! Metrics collectors and the external metrics sink contract.

pub mod capacity;
pub mod chain;
pub mod sink;

pub use capacity::{CapacityCollector, CapacitySnapshot};
pub use chain::{ChainCollector, ChainSnapshot, LatencyStats, TurnstileStats};
pub use sink::{MetricsSink, TracingMetricsSink};
