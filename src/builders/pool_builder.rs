//! Builders to construct capacity pools from configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, PoolKindConfig};
use crate::core::budget::ResourceBudget;
use crate::core::capacity::{CapacityPool, ResourceCapacityPool};
use crate::core::error::EngineError;
use crate::core::quota::QuotaCapacityPool;
use crate::runtime::api::PoolRegistry;

/// Pools constructed from an [`EngineConfig`].
pub struct BuiltPools {
    /// Every pool, registered under its configured name.
    pub registry: PoolRegistry,
    /// Quota pools with a configured reset interval. Timer lifecycle is
    /// explicit: callers start each with
    /// [`QuotaCapacityPool::start_reset_timer`] once a runtime is available.
    pub quota_timers: Vec<(Arc<QuotaCapacityPool>, Duration)>,
}

fn budget_from(ceiling: &BTreeMap<String, i64>) -> ResourceBudget {
    ceiling.iter().map(|(k, v)| (k.clone(), *v)).collect()
}

/// Build all configured pools, resolving parent links (parents are resource
/// pools and are constructed before their children).
pub fn build_pools(cfg: &EngineConfig) -> Result<BuiltPools, EngineError> {
    cfg.validate().map_err(EngineError::Config)?;

    let mut resources: HashMap<String, Arc<ResourceCapacityPool>> = HashMap::new();
    let mut pending: Vec<(&String, &crate::config::CapacityPoolConfig)> = cfg
        .pools
        .iter()
        .filter(|(_, pool)| pool.kind == PoolKindConfig::Resource)
        .collect();

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|(name, pool_cfg)| {
            let ceiling = budget_from(&pool_cfg.ceiling);
            match pool_cfg.parent.as_deref() {
                None => {
                    resources.insert(
                        (*name).clone(),
                        Arc::new(ResourceCapacityPool::new((*name).clone(), ceiling)),
                    );
                    false
                }
                Some(parent_name) => resources.get(parent_name).cloned().map_or(
                    true,
                    |parent| {
                        resources.insert(
                            (*name).clone(),
                            Arc::new(ResourceCapacityPool::with_parent(
                                (*name).clone(),
                                ceiling,
                                parent,
                            )),
                        );
                        false
                    },
                ),
            }
        });
        if pending.len() == before {
            // Unreachable after validate(), which rejects unknown parents
            // and cycles.
            return Err(EngineError::Config(
                "unresolvable pool parent ordering".into(),
            ));
        }
    }

    let registry = PoolRegistry::new();
    for pool in resources.values() {
        let pool: Arc<dyn CapacityPool> = Arc::<ResourceCapacityPool>::clone(pool);
        registry.register(pool)?;
    }

    let mut quota_timers = Vec::new();
    for (name, pool_cfg) in &cfg.pools {
        if pool_cfg.kind != PoolKindConfig::Quota {
            continue;
        }
        let ceiling = budget_from(&pool_cfg.ceiling);
        let pool = match pool_cfg.parent.as_deref() {
            Some(parent_name) => {
                let parent = resources.get(parent_name).cloned().ok_or_else(|| {
                    EngineError::Config(format!("unknown parent `{parent_name}`"))
                })?;
                Arc::new(QuotaCapacityPool::with_parent(name.clone(), ceiling, parent))
            }
            None => Arc::new(QuotaCapacityPool::new(name.clone(), ceiling)),
        };
        let registered: Arc<dyn CapacityPool> = Arc::<QuotaCapacityPool>::clone(&pool);
        registry.register(registered)?;
        if let Some(interval_ms) = pool_cfg.reset_interval_ms {
            quota_timers.push((pool, Duration::from_millis(interval_ms)));
        }
    }

    Ok(BuiltPools {
        registry,
        quota_timers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_pools_resolves_parents() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "pools": {
                    "node": {"kind": "resource", "ceiling": {"slots": 8}},
                    "gpu": {"kind": "resource", "ceiling": {"slots": 2}, "parent": "node"},
                    "rpm": {"kind": "quota", "ceiling": {"requests": 100},
                            "parent": "gpu", "reset_interval_ms": 60000}
                }
            }"#,
        )
        .unwrap();

        let built = build_pools(&cfg).unwrap();
        assert_eq!(built.registry.list().len(), 3);
        assert_eq!(built.quota_timers.len(), 1);

        // Acquiring through the quota must drain the resource chain too.
        let rpm = built.registry.get("rpm").unwrap();
        let cost = ResourceBudget::new().with("requests", 1);
        // "requests" is unknown to the resource parents, so only the quota
        // dimension moves.
        rpm.try_acquire(&cost).unwrap();
        assert_eq!(
            built.registry.available("rpm").unwrap().amount("requests"),
            99
        );
    }
}
