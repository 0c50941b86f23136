//! Builders to construct pool registries from configuration.

pub mod pool_builder;

pub use pool_builder::{build_pools, BuiltPools};
