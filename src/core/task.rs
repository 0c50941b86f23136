//! Scheduled task model and progress envelopes.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::core::budget::ResourceBudget;
use crate::core::error::{AppResult, EngineError};
use crate::util::serde::TaskKey;

/// Boxed single-shot task body.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'static>>;

/// Outcome of driving a stepped task once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// An intermediate value; the task is not finished.
    Yield(T),
    /// The task's return value; no further steps may be taken.
    Complete(T),
}

/// A multi-step task body: a generator-like sequence yielding intermediate
/// values and finally returning a value.
///
/// The runner drives `step()` repeatedly, emitting one intermediate envelope
/// per [`StepOutcome::Yield`] and a final envelope for
/// [`StepOutcome::Complete`]. Implementations must not be stepped again
/// after completing.
#[async_trait]
pub trait TaskStep<T>: Send {
    /// Advance the sequence by one step.
    async fn step(&mut self) -> AppResult<StepOutcome<T>>;
}

/// The body of a scheduled task: a plain async function or a step-emitting
/// sequence.
pub enum TaskBody<T> {
    /// Runs to completion in one await, producing exactly one value.
    Single(TaskFuture<T>),
    /// Yields zero or more intermediate values before returning.
    Stepped(Box<dyn TaskStep<T> + 'static>),
}

impl<T> std::fmt::Debug for TaskBody<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("TaskBody::Single"),
            Self::Stepped(_) => f.write_str("TaskBody::Stepped"),
        }
    }
}

/// Callback invoked with the final value of a completed task.
pub type CompletionHook<T> = Box<dyn FnOnce(&T) + Send>;
/// Callback invoked with the error of a failed task.
pub type ErrorHook = Box<dyn FnOnce(&EngineError) + Send>;

/// A unit of work admitted by the scheduled task runner.
///
/// Created by the caller before scheduling, consumed exactly once by the
/// runner, and never mutated after being peeked. The body must not retain
/// references to engine-internal state.
pub struct ScheduledTask<T> {
    /// Opaque identifier correlating this task's progress envelopes.
    pub key: TaskKey,
    /// Resource cost for capacity accounting.
    pub cost: ResourceBudget,
    /// The work itself.
    pub body: TaskBody<T>,
    /// Invoked after the final value is emitted.
    pub on_complete: Option<CompletionHook<T>>,
    /// Invoked after an error envelope is emitted (or before a fatal
    /// propagation).
    pub on_error: Option<ErrorHook>,
}

impl<T> ScheduledTask<T> {
    /// A single-shot task from a plain async function.
    pub fn single<F>(key: impl Into<TaskKey>, cost: ResourceBudget, fut: F) -> Self
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            cost,
            body: TaskBody::Single(Box::pin(fut)),
            on_complete: None,
            on_error: None,
        }
    }

    /// A multi-step task from a step sequence.
    pub fn stepped(
        key: impl Into<TaskKey>,
        cost: ResourceBudget,
        steps: impl TaskStep<T> + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            cost,
            body: TaskBody::Stepped(Box::new(steps)),
            on_complete: None,
            on_error: None,
        }
    }

    /// Attach a completion callback.
    #[must_use]
    pub fn on_complete(mut self, hook: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Attach an error callback.
    #[must_use]
    pub fn on_error(mut self, hook: impl FnOnce(&EngineError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

impl<T> std::fmt::Debug for ScheduledTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("key", &self.key)
            .field("cost", &self.cost)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Streaming progress report for one scheduled task.
///
/// Zero or more `Intermediate` envelopes may be emitted per task; exactly one
/// `Final` or `Error` terminates a task's stream.
#[derive(Debug)]
pub enum Progress<T> {
    /// An intermediate value from a stepped task.
    Intermediate {
        /// Key of the reporting task.
        key: TaskKey,
        /// The yielded value.
        value: T,
    },
    /// The task's return value.
    Final {
        /// Key of the reporting task.
        key: TaskKey,
        /// The returned value.
        value: T,
    },
    /// The task failed.
    Error {
        /// Key of the reporting task.
        key: TaskKey,
        /// What went wrong.
        error: EngineError,
    },
}

impl<T> Progress<T> {
    /// Key of the task this envelope reports on.
    #[must_use]
    pub const fn key(&self) -> &TaskKey {
        match self {
            Self::Intermediate { key, .. } | Self::Final { key, .. } | Self::Error { key, .. } => {
                key
            }
        }
    }

    /// Whether this envelope terminates its task's stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Intermediate { .. })
    }
}
