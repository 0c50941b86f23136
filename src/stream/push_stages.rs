//! Push pipeline stages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::error::{AppResult, EngineError};
use crate::metrics::chain::ChainCollector;
use crate::stream::push::PushSink;

/// Serializer stage: queues concurrent deliveries through a single ordered
/// execution path.
///
/// Concurrent "accept next" calls may race; cloned handles of this stage
/// share one fair FIFO mutex around the downstream sink, so downstream
/// stages observe strictly sequential input regardless of producer
/// concurrency.
pub struct Serializer<K> {
    inner: Arc<tokio::sync::Mutex<K>>,
}

impl<K> Serializer<K> {
    /// Wrap `sink` behind the ordered execution path.
    #[must_use]
    pub fn new(sink: K) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(sink)),
        }
    }
}

impl<K> Clone for Serializer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<K: PushSink> PushSink for Serializer<K> {
    type Item = K::Item;

    async fn accept(&mut self, item: K::Item) -> Result<(), EngineError> {
        let mut sink = self.inner.lock().await;
        sink.accept(item).await
    }

    /// Finish exactly once, from the producer coordinator, after all
    /// deliveries have settled.
    async fn finish(&mut self) -> Result<(), EngineError> {
        let mut sink = self.inner.lock().await;
        sink.finish().await
    }
}

type Predicate<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// Runtime-replaceable handle onto a [`Filter`] stage's predicate.
pub struct FilterHandle<T> {
    predicate: Arc<Mutex<Predicate<T>>>,
}

impl<T> Clone for FilterHandle<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> FilterHandle<T> {
    /// Swap in a new predicate; takes effect on the next delivery.
    pub fn replace(&self, predicate: impl FnMut(&T) -> bool + Send + 'static) {
        *self.predicate.lock() = Box::new(predicate);
    }
}

/// Filter stage: a predicate gate with a runtime-replaceable predicate,
/// supporting dynamic load shedding.
pub struct Filter<K: PushSink> {
    sink: K,
    predicate: Arc<Mutex<Predicate<K::Item>>>,
}

impl<K: PushSink> Filter<K> {
    /// Gate `sink` behind `predicate`.
    pub fn new(sink: K, predicate: impl FnMut(&K::Item) -> bool + Send + 'static) -> Self {
        Self {
            sink,
            predicate: Arc::new(Mutex::new(Box::new(predicate))),
        }
    }

    /// Handle for replacing the predicate at runtime.
    #[must_use]
    pub fn handle(&self) -> FilterHandle<K::Item> {
        FilterHandle {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

#[async_trait]
impl<K: PushSink> PushSink for Filter<K> {
    type Item = K::Item;

    async fn accept(&mut self, item: K::Item) -> Result<(), EngineError> {
        let pass = {
            let mut predicate = self.predicate.lock();
            predicate(&item)
        };
        if pass {
            self.sink.accept(item).await
        } else {
            Ok(())
        }
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        self.sink.finish().await
    }
}

/// Push-side fixed window: batches exactly `size` delivered items per
/// downstream delivery; the remainder is flushed on stream end.
pub struct PushFixedWindow<T, K> {
    sink: K,
    size: usize,
    window: Vec<T>,
}

impl<T: Send, K: PushSink<Item = Vec<T>>> PushFixedWindow<T, K> {
    /// Wrap `sink`, batching `size` items per delivery.
    #[must_use]
    pub fn new(sink: K, size: usize) -> Self {
        Self {
            sink,
            size,
            window: Vec::with_capacity(size),
        }
    }
}

#[async_trait]
impl<T: Send, K: PushSink<Item = Vec<T>>> PushSink for PushFixedWindow<T, K> {
    type Item = T;

    async fn accept(&mut self, item: T) -> Result<(), EngineError> {
        self.window.push(item);
        if self.window.len() >= self.size {
            let full = std::mem::replace(&mut self.window, Vec::with_capacity(self.size));
            self.sink.accept(full).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        if !self.window.is_empty() {
            let rest = std::mem::take(&mut self.window);
            self.sink.accept(rest).await?;
        }
        self.sink.finish().await
    }
}

/// Push-side window-with-deadline: batches up to `size` items, flushing a
/// stale window at the next delivery event once the deadline has elapsed.
///
/// Driven by delivery events, with the timer reset on each delivered item;
/// there is no autonomous background flusher. `finish` flushes whatever is
/// buffered.
pub struct PushDeadlineWindow<T, K> {
    sink: K,
    size: usize,
    deadline: Duration,
    window: Vec<T>,
    expires_at: Option<Instant>,
}

impl<T: Send, K: PushSink<Item = Vec<T>>> PushDeadlineWindow<T, K> {
    /// Wrap `sink` with a window of `size` items or `deadline` staleness.
    #[must_use]
    pub fn new(sink: K, size: usize, deadline: Duration) -> Self {
        Self {
            sink,
            size,
            deadline,
            window: Vec::with_capacity(size),
            expires_at: None,
        }
    }

    async fn flush(&mut self) -> Result<(), EngineError> {
        let full = std::mem::replace(&mut self.window, Vec::with_capacity(self.size));
        self.expires_at = None;
        self.sink.accept(full).await
    }
}

#[async_trait]
impl<T: Send, K: PushSink<Item = Vec<T>>> PushSink for PushDeadlineWindow<T, K> {
    type Item = T;

    async fn accept(&mut self, item: T) -> Result<(), EngineError> {
        let now = Instant::now();
        if let Some(at) = self.expires_at {
            if now >= at && !self.window.is_empty() {
                // The buffered window went stale before this delivery.
                self.flush().await?;
            }
        }
        self.window.push(item);
        if self.window.len() >= self.size {
            self.flush().await
        } else {
            self.expires_at = Some(now + self.deadline);
            Ok(())
        }
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        if !self.window.is_empty() {
            self.flush().await?;
        }
        self.sink.finish().await
    }
}

type KeyFn<T> = Box<dyn Fn(&T) -> String + Send>;

/// Push-side turnstile: a pass-through checkpoint reporting to a
/// [`ChainCollector`].
pub struct PushTurnstile<K: PushSink> {
    sink: K,
    checkpoint: String,
    collector: Arc<ChainCollector>,
    key_fn: Option<KeyFn<K::Item>>,
}

impl<K: PushSink> PushTurnstile<K> {
    /// FIFO-correlated checkpoint.
    pub fn new(sink: K, checkpoint: impl Into<String>, collector: Arc<ChainCollector>) -> Self {
        Self {
            sink,
            checkpoint: checkpoint.into(),
            collector,
            key_fn: None,
        }
    }

    /// Key-correlated checkpoint for reordering pipelines.
    pub fn keyed(
        sink: K,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
        key_fn: impl Fn(&K::Item) -> String + Send + 'static,
    ) -> Self {
        Self {
            sink,
            checkpoint: checkpoint.into(),
            collector,
            key_fn: Some(Box::new(key_fn)),
        }
    }
}

#[async_trait]
impl<K: PushSink> PushSink for PushTurnstile<K> {
    type Item = K::Item;

    async fn accept(&mut self, item: K::Item) -> Result<(), EngineError> {
        let key = self.key_fn.as_ref().map(|f| f(&item));
        self.collector.record_pass(&self.checkpoint, key);
        self.sink.accept(item).await
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        self.sink.finish().await
    }
}

/// Fan-out stage: duplicates every delivery to all downstream sinks.
pub struct FanOut<K> {
    sinks: Vec<K>,
}

impl<K> FanOut<K> {
    /// Duplicate deliveries across `sinks`.
    #[must_use]
    pub const fn new(sinks: Vec<K>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl<K: PushSink> PushSink for FanOut<K>
where
    K::Item: Clone,
{
    type Item = K::Item;

    async fn accept(&mut self, item: K::Item) -> Result<(), EngineError> {
        let Some((last, rest)) = self.sinks.split_last_mut() else {
            return Ok(());
        };
        for sink in rest {
            sink.accept(item.clone()).await?;
        }
        last.accept(item).await
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        for sink in &mut self.sinks {
            sink.finish().await?;
        }
        Ok(())
    }
}

/// Round-robin stage: distributes deliveries across downstream sinks in
/// rotation.
pub struct RoundRobin<K> {
    sinks: Vec<K>,
    next: usize,
}

impl<K> RoundRobin<K> {
    /// Distribute deliveries across `sinks`.
    #[must_use]
    pub const fn new(sinks: Vec<K>) -> Self {
        Self { sinks, next: 0 }
    }
}

#[async_trait]
impl<K: PushSink> PushSink for RoundRobin<K> {
    type Item = K::Item;

    async fn accept(&mut self, item: K::Item) -> Result<(), EngineError> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let idx = self.next;
        self.next = (self.next + 1) % self.sinks.len();
        self.sinks[idx].accept(item).await
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        for sink in &mut self.sinks {
            sink.finish().await?;
        }
        Ok(())
    }
}

/// A coroutine-style push processor: consumes inputs at suspension points
/// and may yield outputs per resume.
#[async_trait]
pub trait PushCoroutine: Send {
    /// Values delivered into the coroutine.
    type Input: Send;
    /// Values the coroutine emits downstream.
    type Output: Send;

    /// Advance to the next suspension point. `input` is `None` only for the
    /// priming resume performed by the adapter.
    async fn resume(&mut self, input: Option<Self::Input>) -> AppResult<Resumed<Self::Output>>;
}

/// What a coroutine resume produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumed<O> {
    /// Zero or more outputs; the coroutine awaits further input.
    Yielded(Vec<O>),
    /// The coroutine is finished and accepts no more input.
    Done,
}

/// Lifecycle of a [`CoroutineStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Not yet primed.
    NotStarted,
    /// Primed; parked at a suspension point.
    AwaitingInput,
    /// A resume is in progress.
    Emitting,
    /// The coroutine completed; further deliveries are rejected.
    Done,
}

/// Adapter running a [`PushCoroutine`] as a push stage.
///
/// The mandatory priming resume - advancing the coroutine to its first
/// suspension point - is performed internally on the first delivery, so
/// callers never pass a discarded first value.
pub struct CoroutineStage<C, K> {
    coroutine: C,
    sink: K,
    state: CoroutineState,
}

impl<C, K> CoroutineStage<C, K>
where
    C: PushCoroutine,
    K: PushSink<Item = C::Output>,
{
    /// Wrap `coroutine` feeding `sink`.
    #[must_use]
    pub const fn new(sink: K, coroutine: C) -> Self {
        Self {
            coroutine,
            sink,
            state: CoroutineState::NotStarted,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> CoroutineState {
        self.state
    }

    async fn resume_with(&mut self, input: Option<C::Input>) -> Result<(), EngineError> {
        self.state = CoroutineState::Emitting;
        match self.coroutine.resume(input).await {
            Ok(Resumed::Yielded(outputs)) => {
                for output in outputs {
                    self.sink.accept(output).await?;
                }
                self.state = CoroutineState::AwaitingInput;
                Ok(())
            }
            Ok(Resumed::Done) => {
                self.state = CoroutineState::Done;
                Ok(())
            }
            Err(err) => {
                self.state = CoroutineState::Done;
                Err(EngineError::Backend(format!("{err:#}")))
            }
        }
    }
}

#[async_trait]
impl<C, K> PushSink for CoroutineStage<C, K>
where
    C: PushCoroutine,
    K: PushSink<Item = C::Output>,
{
    type Item = C::Input;

    async fn accept(&mut self, item: C::Input) -> Result<(), EngineError> {
        if self.state == CoroutineState::NotStarted {
            tracing::trace!("priming coroutine stage");
            self.resume_with(None).await?;
        }
        if self.state == CoroutineState::Done {
            return Err(EngineError::StreamClosed);
        }
        self.resume_with(Some(item)).await
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        self.sink.finish().await
    }
}
