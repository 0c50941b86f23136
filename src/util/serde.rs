//! Shared serializable identifier and ordering types.

use serde::{Deserialize, Serialize};

/// Opaque task identifier used to correlate progress envelopes and
/// dependency edges. Callers pick the scheme (job ids, request ids, ...).
pub type TaskKey = String;

/// Identifier for a single runner drain.
pub type RunId = uuid::Uuid;

/// Priority used by ordering-aware task sources.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Must-run-first work.
    Critical,
}
