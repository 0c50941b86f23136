//! Multi-dimensional resource budgets.
//!
//! A budget maps resource-dimension names to signed quantities. Costs and
//! ceilings are validated non-negative; signed accounting exists so that
//! `acquire_immediate` can model externally imposed reservations that push a
//! dimension below zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A mapping from resource-dimension name to a quantity, e.g.
/// `{slots: 6, memory_gb: 16}`.
///
/// A dimension absent from a cost is treated as zero cost. A dimension
/// present in a cost but absent from a budget makes that cost unsatisfiable
/// against the budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceBudget {
    dims: BTreeMap<String, i64>,
}

impl ResourceBudget {
    /// Create an empty budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dims: BTreeMap::new(),
        }
    }

    /// Builder-style: set one dimension.
    #[must_use]
    pub fn with(mut self, dim: impl Into<String>, amount: i64) -> Self {
        self.dims.insert(dim.into(), amount);
        self
    }

    /// Quantity for one dimension; absent dimensions read as zero.
    #[must_use]
    pub fn amount(&self, dim: &str) -> i64 {
        self.dims.get(dim).copied().unwrap_or(0)
    }

    /// Whether the budget names the given dimension.
    #[must_use]
    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.contains_key(dim)
    }

    /// Iterate over `(dimension, quantity)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.dims.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Whether the budget names no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Whether every quantity is `>= 0`.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        self.dims.values().all(|v| *v >= 0)
    }

    /// Whether this budget can satisfy `cost` in full.
    ///
    /// Every dimension `cost` names with a positive quantity must be present
    /// here with at least that quantity remaining.
    #[must_use]
    pub fn covers(&self, cost: &Self) -> bool {
        cost.iter()
            .filter(|(_, amount)| *amount > 0)
            .all(|(dim, amount)| self.has_dim(dim) && self.amount(dim) >= amount)
    }

    /// Like [`covers`](Self::covers), but enforcing only dimensions this
    /// budget tracks; cost dimensions unknown here pass unchecked. Ancestor
    /// pools use this so a parent constrains only what it accounts for.
    #[must_use]
    pub fn covers_tracked(&self, cost: &Self) -> bool {
        cost.iter()
            .filter(|(_, amount)| *amount > 0)
            .all(|(dim, amount)| !self.has_dim(dim) || self.amount(dim) >= amount)
    }

    /// Subtract `cost` entry-wise. Dimensions unknown to this budget are
    /// ignored; the result may go negative.
    pub fn deduct(&mut self, cost: &Self) {
        for (dim, amount) in cost.iter() {
            if let Some(v) = self.dims.get_mut(dim) {
                *v -= amount;
            }
        }
    }

    /// Add `amount` entry-wise, capping each dimension at `cap`.
    /// Dimensions unknown to this budget are ignored.
    pub fn restore_capped(&mut self, amount: &Self, cap: &Self) {
        for (dim, delta) in amount.iter() {
            if let Some(v) = self.dims.get_mut(dim) {
                *v = (*v + delta).min(cap.amount(dim));
            }
        }
    }

    /// Add `other` entry-wise, inserting dimensions not yet present.
    pub fn accumulate(&mut self, other: &Self) {
        for (dim, amount) in other.iter() {
            *self.dims.entry(dim.to_string()).or_insert(0) += amount;
        }
    }

    /// Subtract `other` entry-wise, flooring every dimension at zero.
    pub fn deduct_floored(&mut self, other: &Self) {
        for (dim, amount) in other.iter() {
            let entry = self.dims.entry(dim.to_string()).or_insert(0);
            *entry = (*entry - amount).max(0);
        }
    }

    /// Apply `cap` as an upper bound per dimension. No lower bound is
    /// applied. Used when limits are lowered at runtime.
    pub fn cap_at(&mut self, cap: &Self) {
        for (dim, v) in &mut self.dims {
            *v = (*v).min(cap.amount(dim));
        }
    }

    /// Per-dimension ratio `used / ceiling` where
    /// `used = ceiling - available`, clamped to `>= 0`. Dimensions with a
    /// zero ceiling report zero utilization.
    #[must_use]
    pub fn utilization_against(&self, ceiling: &Self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (dim, limit) in ceiling.iter() {
            if limit <= 0 {
                out.insert(dim.to_string(), 0.0);
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let in_flight = (limit - self.amount(dim)).max(0) as f64;
            #[allow(clippy::cast_precision_loss)]
            let ratio = in_flight / limit as f64;
            out.insert(dim.to_string(), ratio);
        }
        out
    }
}

impl FromIterator<(String, i64)> for ResourceBudget {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            dims: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_requires_dimension_present() {
        let budget = ResourceBudget::new().with("slots", 4);
        let cost = ResourceBudget::new().with("slots", 2).with("vram_gb", 1);
        // vram_gb is not tracked by the budget, so the cost is unsatisfiable.
        assert!(!budget.covers(&cost));
    }

    #[test]
    fn test_unspecified_cost_dimension_is_zero() {
        let budget = ResourceBudget::new().with("slots", 4).with("vram_gb", 16);
        let cost = ResourceBudget::new().with("slots", 4);
        assert!(budget.covers(&cost));
    }

    #[test]
    fn test_deduct_and_restore_capped() {
        let ceiling = ResourceBudget::new().with("slots", 4);
        let mut available = ceiling.clone();
        let cost = ResourceBudget::new().with("slots", 3);

        available.deduct(&cost);
        assert_eq!(available.amount("slots"), 1);

        // Restoring more than was taken is capped at the ceiling.
        available.restore_capped(&ResourceBudget::new().with("slots", 10), &ceiling);
        assert_eq!(available.amount("slots"), 4);
    }

    #[test]
    fn test_deduct_may_go_negative() {
        let mut available = ResourceBudget::new().with("slots", 1);
        available.deduct(&ResourceBudget::new().with("slots", 3));
        assert_eq!(available.amount("slots"), -2);
        assert!(!available.is_non_negative());
    }

    #[test]
    fn test_utilization() {
        let ceiling = ResourceBudget::new().with("slots", 4);
        let available = ResourceBudget::new().with("slots", 1);
        let util = available.utilization_against(&ceiling);
        assert!((util["slots"] - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serde_shape_is_flat_map() {
        let budget = ResourceBudget::new().with("slots", 6).with("memory_gb", 16);
        let json = serde_json::to_string(&budget).unwrap();
        assert_eq!(json, r#"{"memory_gb":16,"slots":6}"#);
        let parsed: ResourceBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, budget);
    }
}
