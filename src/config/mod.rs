//! Configuration models for pools and the runner.

pub mod pool;

pub use pool::{CapacityPoolConfig, EngineConfig, PoolKindConfig, RunnerConfig};
