//! # Prometheus Conduit
//!
//! A composable asynchronous stream engine with integrated resource-aware
//! task scheduling for AI agent workloads.
//!
//! This library provides two stream abstractions and a scheduler that runs
//! heterogeneous units of work under multi-dimensional resource budgets:
//!
//! - **Pull sources** produce a value only when the consumer asks - this is
//!   the backpressure primitive. Stages such as prefetch, bounded-wait,
//!   windowing, and turnstile checkpoints compose into pull pipelines.
//! - **Push sinks** accept values whenever a producer delivers them. Stages
//!   such as the serializer, replaceable-predicate filter, windowing, fan-out,
//!   and round-robin compose into push pipelines.
//! - A **bridge** connects a push-side producer to a pull-side consumer
//!   through a shared buffer coordinated by a [`signal::WaitSignal`].
//! - **Capacity pools** track named multi-dimensional budgets with atomic
//!   all-or-nothing acquisition and hierarchical parent budgets; **quota
//!   pools** model consumption limits where release does not restore capacity.
//! - The **scheduled task runner** drains a peekable task source with a
//!   peek-check-acquire protocol, admitting at most the work the current
//!   budget allows and emitting a stream of progress envelopes.
//!
//! ## Core Problem Solved
//!
//! AI workloads have fundamentally different resource constraints than typical
//! web services:
//!
//! - **GPU VRAM Limits**: Running multiple LLM inference tasks can exceed available GPU memory
//! - **Provider Rate Limits**: Upstream model APIs budget calls per minute, not concurrency
//! - **Streaming Progress**: Long inference tasks report intermediate output before the final result
//! - **Rate Mismatch**: Producers and consumers rarely agree on throughput
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_conduit::core::{ResourceBudget, ResourceCapacityPool, ScheduledTask, ScheduledTaskRunner};
//! use prometheus_conduit::infra::source::memory::InMemoryTaskSource;
//! use prometheus_conduit::runtime::TokioSpawner;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ResourceCapacityPool::new(
//!     "gpu",
//!     ResourceBudget::new().with("slots", 2).with("vram_gb", 16),
//! ));
//!
//! let mut source = InMemoryTaskSource::new();
//! source.push(ScheduledTask::single(
//!     "job-1",
//!     ResourceBudget::new().with("slots", 1),
//!     async { Ok("done".to_string()) },
//! ));
//!
//! let runner = ScheduledTaskRunner::new(source, pool, TokioSpawner::current());
//! let mut run = runner.run();
//! // drain run.envelopes() ... then run.finish().await
//! ```
//!
//! For complete examples, see:
//! - `tests/stream_engine_test.rs` - Full integration tests
//! - `README.md` - Comprehensive documentation

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core capacity accounting, task model, and the scheduled task runner.
pub mod core;
/// Configuration models for pools and the runner.
pub mod config;
/// Builders to construct pool registries from configuration.
pub mod builders;
/// Infrastructure adapters: peekable task sources.
pub mod infra;
/// Metrics collectors and the external metrics sink contract.
pub mod metrics;
/// Runtime adapters (spawner) and the pool admin surface.
pub mod runtime;
/// Async wait signal used to coordinate suspension and wake-up.
pub mod signal;
/// Pull and push stream abstractions, pipeline stages, and the bridge.
pub mod stream;
/// Shared utilities.
pub mod util;
