//! Pool and runner configuration structures.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Pool kind selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKindConfig {
    /// Release restores capacity (concurrency-style budget).
    Resource,
    /// Release is a no-op; refill only via reset/increment (rate-limit
    /// style budget).
    Quota,
}

/// Configuration for one capacity pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityPoolConfig {
    /// Pool kind.
    pub kind: PoolKindConfig,
    /// Per-dimension ceiling, e.g. `{"slots": 6, "memory_gb": 16}`.
    pub ceiling: BTreeMap<String, i64>,
    /// Optional parent pool name. Parents must be resource pools.
    #[serde(default)]
    pub parent: Option<String>,
    /// Periodic hard-refill interval for quota pools, milliseconds.
    #[serde(default)]
    pub reset_interval_ms: Option<u64>,
}

/// Scheduled task runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// `true`: task failures emit error envelopes and draining continues.
    /// `false`: the first task failure is fatal for the run.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

const fn default_continue_on_error() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
        }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, CapacityPoolConfig>,
    /// Runner defaults.
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl CapacityPoolConfig {
    /// Validate one pool's values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ceiling.is_empty() {
            return Err("ceiling must name at least one dimension".into());
        }
        for (dim, amount) in &self.ceiling {
            if *amount < 0 {
                return Err(format!("ceiling dimension `{dim}` must be non-negative"));
            }
        }
        match (self.kind, self.reset_interval_ms) {
            (PoolKindConfig::Resource, Some(_)) => {
                Err("reset_interval_ms only applies to quota pools".into())
            }
            (PoolKindConfig::Quota, Some(0)) => {
                Err("reset_interval_ms must be greater than 0".into())
            }
            _ => Ok(()),
        }
    }
}

impl EngineConfig {
    /// Validate all pools and their parent links.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;

            // Walk the parent chain: parents must exist, be resource pools,
            // and never loop back.
            let mut seen = HashSet::from([name.as_str()]);
            let mut current = pool.parent.as_deref();
            while let Some(parent_name) = current {
                let parent = self.pools.get(parent_name).ok_or_else(|| {
                    format!("pool `{name}` names unknown parent `{parent_name}`")
                })?;
                if parent.kind != PoolKindConfig::Resource {
                    return Err(format!(
                        "pool `{name}` parent `{parent_name}` must be a resource pool"
                    ));
                }
                if !seen.insert(parent_name) {
                    return Err(format!("pool `{name}` parent chain contains a cycle"));
                }
                current = parent.parent.as_deref();
            }
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the `CONDUIT_CONFIG` environment variable
    /// (JSON), honoring a `.env` file if present.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let raw = std::env::var("CONDUIT_CONFIG")
            .map_err(|_| "CONDUIT_CONFIG is not set".to_string())?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(slots: i64) -> CapacityPoolConfig {
        CapacityPoolConfig {
            kind: PoolKindConfig::Resource,
            ceiling: BTreeMap::from([("slots".to_string(), slots)]),
            parent: None,
            reset_interval_ms: None,
        }
    }

    #[test]
    fn test_valid_config_parses() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "pools": {
                    "gpu": {"kind": "resource", "ceiling": {"slots": 2, "vram_gb": 16}},
                    "rpm": {"kind": "quota", "ceiling": {"requests": 100},
                            "parent": "gpu", "reset_interval_ms": 60000}
                },
                "runner": {"continue_on_error": false}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.pools.len(), 2);
        assert!(!cfg.runner.continue_on_error);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut cfg = EngineConfig {
            pools: HashMap::from([("a".to_string(), resource(1))]),
            runner: RunnerConfig::default(),
        };
        cfg.pools.get_mut("a").unwrap().parent = Some("missing".into());
        assert!(cfg.validate().unwrap_err().contains("unknown parent"));
    }

    #[test]
    fn test_quota_parent_rejected() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "pools": {
                    "q": {"kind": "quota", "ceiling": {"requests": 1}},
                    "child": {"kind": "resource", "ceiling": {"slots": 1}, "parent": "q"}
                }
            }"#,
        );
        assert!(cfg.unwrap_err().contains("must be a resource pool"));
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "pools": {
                    "a": {"kind": "resource", "ceiling": {"slots": 1}, "parent": "b"},
                    "b": {"kind": "resource", "ceiling": {"slots": 1}, "parent": "a"}
                }
            }"#,
        );
        assert!(cfg.unwrap_err().contains("cycle"));
    }

    #[test]
    fn test_negative_ceiling_rejected() {
        let cfg = EngineConfig::from_json_str(
            r#"{"pools": {"a": {"kind": "resource", "ceiling": {"slots": -1}}}}"#,
        );
        assert!(cfg.unwrap_err().contains("non-negative"));
    }

    #[test]
    fn test_from_env_reads_conduit_config() {
        std::env::set_var(
            "CONDUIT_CONFIG",
            r#"{"pools": {"gpu": {"kind": "resource", "ceiling": {"slots": 2}}}}"#,
        );
        let cfg = EngineConfig::from_env().unwrap();
        assert!(cfg.pools.contains_key("gpu"));
        std::env::remove_var("CONDUIT_CONFIG");
    }

    #[test]
    fn test_reset_interval_on_resource_rejected() {
        let cfg = EngineConfig::from_json_str(
            r#"{"pools": {"a": {"kind": "resource", "ceiling": {"slots": 1}, "reset_interval_ms": 1000}}}"#,
        );
        assert!(cfg.unwrap_err().contains("only applies to quota pools"));
    }
}
