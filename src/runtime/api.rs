//! Pool admin surface.
//!
//! Intended for external control loops (e.g. an autoscaler) that adjust
//! limits based on observed backlog or external signals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::budget::ResourceBudget;
use crate::core::capacity::CapacityPool;
use crate::core::error::EngineError;

/// Named registry of capacity and quota pools.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<String, Arc<dyn CapacityPool>>>,
}

impl PoolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under its own name. Names are unique.
    pub fn register(&self, pool: Arc<dyn CapacityPool>) -> Result<(), EngineError> {
        let name = pool.name().to_string();
        let mut pools = self.pools.lock();
        if pools.contains_key(&name) {
            return Err(EngineError::Config(format!(
                "pool `{name}` already registered"
            )));
        }
        tracing::info!(pool = %name, "pool registered");
        pools.insert(name, pool);
        Ok(())
    }

    /// Look up a pool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn CapacityPool>> {
        self.pools.lock().get(name).cloned()
    }

    /// Replace a pool's ceiling. Non-evicting: in-flight holders drain
    /// naturally; only future acquisitions are gated.
    pub fn update_limits(&self, name: &str, ceiling: ResourceBudget) -> Result<(), EngineError> {
        let pool = self
            .get(name)
            .ok_or_else(|| EngineError::Config(format!("unknown pool `{name}`")))?;
        pool.set_limits(ceiling);
        Ok(())
    }

    /// Current availability of a pool.
    #[must_use]
    pub fn available(&self, name: &str) -> Option<ResourceBudget> {
        self.get(name).map(|pool| pool.available())
    }

    /// Current per-dimension utilization of a pool.
    #[must_use]
    pub fn utilization(&self, name: &str) -> Option<BTreeMap<String, f64>> {
        self.get(name).map(|pool| pool.utilization())
    }

    /// Listings for every registered pool.
    #[must_use]
    pub fn list(&self) -> Vec<PoolListing> {
        let pools = self.pools.lock();
        let mut listings: Vec<PoolListing> = pools
            .values()
            .map(|pool| PoolListing {
                name: pool.name().to_string(),
                ceiling: pool.ceiling(),
                available: pool.available(),
            })
            .collect();
        listings.sort_by(|a, b| a.name.cmp(&b.name));
        listings
    }
}

/// Pool snapshot data for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolListing {
    /// Pool identifier.
    pub name: String,
    /// Configured ceiling.
    pub ceiling: ResourceBudget,
    /// Current availability.
    pub available: ResourceBudget,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Return a health payload.
#[must_use]
pub const fn health() -> Health {
    Health { ok: true }
}
