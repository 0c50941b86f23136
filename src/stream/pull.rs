//! Demand-driven sequences.
//!
//! A pull source produces a value only when the consumer asks - this is the
//! backpressure primitive. Pipelines are chains of stages, each itself a pull
//! source that may invoke its upstream zero or more times per produced value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::EngineError;
use crate::metrics::chain::ChainCollector;
use crate::stream::pull_stages::{
    BoundedWait, DeadlineWindow, FixedWindow, Prefetch, TimeoutMode, Turnstile,
};

/// One answer to "produce next": a value, or completion carrying a final
/// value (generator-style).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled<T, F> {
    /// The next value in the sequence.
    Item(T),
    /// The sequence is exhausted; carries the completion value.
    Done(F),
}

/// Result of a single pull.
pub type PullResult<T, F> = Result<Pulled<T, F>, EngineError>;

/// A demand-driven sequence.
///
/// No value is produced until `pull` is invoked. After a source has
/// completed or failed, further pulls return
/// [`EngineError::StreamClosed`].
#[async_trait]
pub trait PullSource: Send {
    /// The values the sequence produces. Owned (`'static`): items cross task
    /// and channel boundaries inside prefetching and bridging stages.
    type Item: Send + 'static;
    /// The completion value returned when the sequence is exhausted.
    type Final: Send + 'static;

    /// Produce the next value, signal completion, or fail.
    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final>;
}

/// A pull source over any iterator. Completes with `()`.
pub struct IterSource<I> {
    iter: I,
    done: bool,
}

/// Wrap an iterator as a pull source.
pub fn from_iter<I>(iter: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator,
{
    IterSource {
        iter: iter.into_iter(),
        done: false,
    }
}

#[async_trait]
impl<I> PullSource for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;
    type Final = ();

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        if self.done {
            return Err(EngineError::StreamClosed);
        }
        match self.iter.next() {
            Some(item) => Ok(Pulled::Item(item)),
            None => {
                self.done = true;
                Ok(Pulled::Done(()))
            }
        }
    }
}

/// Builder for pull pipelines.
///
/// Each stage-appending call consumes the handle and returns a new one, so
/// two references can never compete over one stream.
pub struct PullPipeline<S> {
    source: S,
}

impl<S: PullSource> PullPipeline<S> {
    /// Start a pipeline from a source.
    pub const fn new(source: S) -> Self {
        Self { source }
    }

    /// Unwrap the composed source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Eagerly issue up to `depth` upstream pulls ahead of consumer demand,
    /// overlapping upstream latency with downstream processing. Bounded
    /// memory: at most `depth` in-flight items.
    pub fn prefetch(self, depth: usize) -> PullPipeline<Prefetch<S>>
    where
        S: 'static,
    {
        PullPipeline::new(Prefetch::new(self.source, depth))
    }

    /// Race each upstream pull against `timeout`. The upstream call is never
    /// abandoned on timeout: its eventual settlement is retained and reused
    /// as the first candidate of the next race.
    pub fn bounded_wait(self, timeout: Duration, mode: TimeoutMode) -> PullPipeline<BoundedWait<S>>
    where
        S: 'static,
    {
        PullPipeline::new(BoundedWait::new(self.source, timeout, mode))
    }

    /// Accumulate exactly `size` upstream values per yielded batch. On
    /// upstream exhaustion mid-window, the partial remainder becomes the
    /// completion value, not a yielded item.
    pub fn fixed_window(self, size: usize) -> PullPipeline<FixedWindow<S>>
    where
        S: PullSource<Final = ()>,
    {
        PullPipeline::new(FixedWindow::new(self.source, size))
    }

    /// Accumulate up to `size` values, flushing early when `deadline`
    /// elapses. The deadline restarts when a window begins, not per item.
    pub fn window_with_deadline(
        self,
        size: usize,
        deadline: Duration,
    ) -> PullPipeline<DeadlineWindow<S>>
    where
        S: PullSource<Final = ()> + 'static,
    {
        PullPipeline::new(DeadlineWindow::new(self.source, size, deadline))
    }

    /// Pass-through checkpoint reporting to `collector` under `checkpoint`,
    /// correlating passes across checkpoints by arrival order (FIFO).
    pub fn turnstile(
        self,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
    ) -> PullPipeline<Turnstile<S>> {
        PullPipeline::new(Turnstile::new(self.source, checkpoint, collector))
    }

    /// Like [`turnstile`](Self::turnstile), but correlating passes by an
    /// explicit per-item key, for reordering pipelines.
    pub fn turnstile_keyed(
        self,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
        key_fn: impl Fn(&S::Item) -> String + Send + 'static,
    ) -> PullPipeline<Turnstile<S>> {
        PullPipeline::new(Turnstile::keyed(self.source, checkpoint, collector, key_fn))
    }

    /// Drain the pipeline: all yielded items plus the completion value.
    pub async fn collect(self) -> Result<(Vec<S::Item>, S::Final), EngineError> {
        let mut source = self.source;
        let mut items = Vec::new();
        loop {
            match source.pull().await? {
                Pulled::Item(item) => items.push(item),
                Pulled::Done(fin) => return Ok((items, fin)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_iter_source_yields_then_completes() {
        let mut source = from_iter(vec![1, 2]);
        assert_eq!(source.pull().await.unwrap(), Pulled::Item(1));
        assert_eq!(source.pull().await.unwrap(), Pulled::Item(2));
        assert_eq!(source.pull().await.unwrap(), Pulled::Done(()));
        assert!(matches!(
            source.pull().await,
            Err(EngineError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_collect() {
        let (items, ()) = PullPipeline::new(from_iter(0..5)).collect().await.unwrap();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }
}
