//! Runtime adapters and the pool admin surface.

pub mod api;
pub mod tokio_spawner;

use std::future::Future;

pub use api::{health, Health, PoolListing, PoolRegistry};
pub use tokio_spawner::TokioSpawner;

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn: Send + Sync {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
