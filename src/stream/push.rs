//! Supply-driven sequences.
//!
//! A push sink exposes "accept next", invoked by a producer whenever it has
//! a value; the producer does not wait for readiness signals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::error::EngineError;
use crate::metrics::chain::ChainCollector;
use crate::stream::push_stages::{
    CoroutineStage, FanOut, Filter, FilterHandle, PushCoroutine, PushDeadlineWindow,
    PushFixedWindow, PushTurnstile, RoundRobin, Serializer,
};

/// A supply-driven sequence consumer.
#[async_trait]
pub trait PushSink: Send {
    /// The values the sink accepts.
    type Item: Send;

    /// Accept the next value.
    async fn accept(&mut self, item: Self::Item) -> Result<(), EngineError>;

    /// The producer signaled end-of-stream. Stages flush buffered state and
    /// propagate downstream.
    async fn finish(&mut self) -> Result<(), EngineError>;
}

/// Terminal sink collecting every accepted item into a shared `Vec`.
pub struct VecSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> VecSink<T> {
    /// Create an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of items accepted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether no items have been accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Snapshot of the accepted items.
    #[must_use]
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock().clone()
    }
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for VecSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

#[async_trait]
impl<T: Send> PushSink for VecSink<T> {
    type Item = T;

    async fn accept(&mut self, item: T) -> Result<(), EngineError> {
        self.items.lock().push(item);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Builder for push pipelines, growing upstream from a terminal sink.
///
/// Each stage-appending call consumes the handle and returns a new one, so
/// two references can never compete over one stream.
pub struct PushPipeline<K> {
    sink: K,
}

impl<K: PushSink> PushPipeline<K> {
    /// Start a pipeline from the terminal sink.
    pub const fn new(sink: K) -> Self {
        Self { sink }
    }

    /// Start a pipeline that duplicates every delivery to all `sinks`.
    pub fn fan_out(sinks: Vec<K>) -> PushPipeline<FanOut<K>>
    where
        K::Item: Clone,
    {
        PushPipeline::new(FanOut::new(sinks))
    }

    /// Start a pipeline that distributes deliveries across `sinks` in
    /// rotation.
    pub fn round_robin(sinks: Vec<K>) -> PushPipeline<RoundRobin<K>> {
        PushPipeline::new(RoundRobin::new(sinks))
    }

    /// Unwrap the composed sink.
    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Force one-at-a-time internal processing. Concurrent deliveries are
    /// queued through a single ordered execution path; everything downstream
    /// observes strictly sequential input.
    ///
    /// Any stage with internal mutable accumulation (windowing, stateful
    /// filtering) must sit downstream of a serializer if the producer may
    /// call concurrently.
    pub fn serializer(self) -> PushPipeline<Serializer<K>> {
        PushPipeline::new(Serializer::new(self.sink))
    }

    /// Predicate gate. The returned handle replaces the predicate at
    /// runtime, supporting dynamic load shedding.
    pub fn filter(
        self,
        predicate: impl FnMut(&K::Item) -> bool + Send + 'static,
    ) -> (PushPipeline<Filter<K>>, FilterHandle<K::Item>) {
        let stage = Filter::new(self.sink, predicate);
        let handle = stage.handle();
        (PushPipeline::new(stage), handle)
    }

    /// Batch exactly `size` delivered items per downstream delivery; the
    /// remainder is flushed on `finish`.
    pub fn fixed_window<T>(self, size: usize) -> PushPipeline<PushFixedWindow<T, K>>
    where
        T: Send,
        K: PushSink<Item = Vec<T>>,
    {
        PushPipeline::new(PushFixedWindow::new(self.sink, size))
    }

    /// Batch up to `size` items, flushing a stale window at the next
    /// delivery event once `deadline` has elapsed; driven by delivery
    /// events, with the timer reset on each delivered item.
    pub fn window_with_deadline<T>(
        self,
        size: usize,
        deadline: Duration,
    ) -> PushPipeline<PushDeadlineWindow<T, K>>
    where
        T: Send,
        K: PushSink<Item = Vec<T>>,
    {
        PushPipeline::new(PushDeadlineWindow::new(self.sink, size, deadline))
    }

    /// Pass-through checkpoint reporting to `collector` under `checkpoint`,
    /// FIFO-correlated.
    pub fn turnstile(
        self,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
    ) -> PushPipeline<PushTurnstile<K>> {
        PushPipeline::new(PushTurnstile::new(self.sink, checkpoint, collector))
    }

    /// Like [`turnstile`](Self::turnstile), but correlated by an explicit
    /// per-item key.
    pub fn turnstile_keyed(
        self,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
        key_fn: impl Fn(&K::Item) -> String + Send + 'static,
    ) -> PushPipeline<PushTurnstile<K>> {
        PushPipeline::new(PushTurnstile::keyed(
            self.sink,
            checkpoint,
            collector,
            key_fn,
        ))
    }

    /// Adapt a coroutine-style processor into a stage. The adapter performs
    /// the priming resume internally on the first delivery; callers never
    /// pass a discarded first value.
    pub fn coroutine<C>(self, coroutine: C) -> PushPipeline<CoroutineStage<C, K>>
    where
        C: PushCoroutine<Output = K::Item>,
    {
        PushPipeline::new(CoroutineStage::new(self.sink, coroutine))
    }
}
