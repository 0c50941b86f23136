//! Pull pipeline stages.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::EngineError;
use crate::metrics::chain::ChainCollector;
use crate::stream::pull::{PullResult, PullSource, Pulled};

/// A settled upstream pull: the source handed back together with its result.
type SettledPull<S> =
    (S, PullResult<<S as PullSource>::Item, <S as PullSource>::Final>);
type InFlightPull<S> = Pin<Box<dyn Future<Output = SettledPull<S>> + Send>>;

/// Upstream ownership for stages that race pulls against timers.
///
/// A pull that loses a race is *retained*, not abandoned: the slot keeps the
/// in-flight future and replays it as the first candidate of the next race,
/// so at most one upstream pull is outstanding and no item is dropped or
/// duplicated.
enum UpstreamSlot<S: PullSource> {
    Ready(S),
    InFlight(InFlightPull<S>),
    Terminated,
}

impl<S: PullSource + 'static> UpstreamSlot<S> {
    fn take_future(&mut self) -> Option<InFlightPull<S>> {
        match std::mem::replace(self, Self::Terminated) {
            Self::Ready(mut source) => Some(Box::pin(async move {
                let result = source.pull().await;
                (source, result)
            })),
            Self::InFlight(fut) => Some(fut),
            Self::Terminated => None,
        }
    }
}

/// Prefetch stage: issues up to `depth` upstream pulls ahead of consumer
/// demand.
///
/// The upstream driver is materialized lazily on the first pull, once a
/// terminal consumer is attached.
pub struct Prefetch<S: PullSource> {
    depth: usize,
    state: PrefetchState<S>,
}

enum PrefetchState<S: PullSource> {
    Unstarted(Option<S>),
    Running(tokio::sync::mpsc::Receiver<PullResult<S::Item, S::Final>>),
    Terminated,
}

impl<S: PullSource + 'static> Prefetch<S> {
    /// Wrap `source`, keeping at most `depth` produced-but-unconsumed items.
    pub const fn new(source: S, depth: usize) -> Self {
        Self {
            depth,
            state: PrefetchState::Unstarted(Some(source)),
        }
    }
}

#[async_trait]
impl<S: PullSource + 'static> PullSource for Prefetch<S> {
    type Item = S::Item;
    type Final = S::Final;

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        loop {
            match &mut self.state {
                PrefetchState::Unstarted(slot) => {
                    let Some(mut source) = slot.take() else {
                        return Err(EngineError::StreamClosed);
                    };
                    let (tx, rx) = tokio::sync::mpsc::channel(self.depth.max(1));
                    tokio::spawn(async move {
                        loop {
                            let result = source.pull().await;
                            let terminal = !matches!(result, Ok(Pulled::Item(_)));
                            if tx.send(result).await.is_err() {
                                // Consumer dropped the stage; stop pulling.
                                break;
                            }
                            if terminal {
                                break;
                            }
                        }
                    });
                    self.state = PrefetchState::Running(rx);
                }
                PrefetchState::Running(rx) => {
                    return match rx.recv().await {
                        Some(Ok(Pulled::Item(item))) => Ok(Pulled::Item(item)),
                        Some(terminal) => {
                            self.state = PrefetchState::Terminated;
                            terminal
                        }
                        None => {
                            self.state = PrefetchState::Terminated;
                            Err(EngineError::StreamClosed)
                        }
                    };
                }
                PrefetchState::Terminated => return Err(EngineError::StreamClosed),
            }
        }
    }
}

/// What a bounded-wait stage does when the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMode {
    /// Yield an empty placeholder (`None`) and retry transparently.
    Retry,
    /// Fail the pull with [`EngineError::TimeoutExceeded`].
    Error,
}

/// Bounded-wait stage: races each upstream pull against a timer.
///
/// Items are re-wrapped in `Option`: `Some(item)` is an upstream value,
/// `None` is the empty placeholder produced on timeout in
/// [`TimeoutMode::Retry`]. The timed-out pull stays in flight and settles
/// into a later pull - exactly-once delivery is preserved.
pub struct BoundedWait<S: PullSource> {
    timeout: Duration,
    mode: TimeoutMode,
    upstream: UpstreamSlot<S>,
}

impl<S: PullSource + 'static> BoundedWait<S> {
    /// Wrap `source` with a per-pull deadline.
    pub const fn new(source: S, timeout: Duration, mode: TimeoutMode) -> Self {
        Self {
            timeout,
            mode,
            upstream: UpstreamSlot::Ready(source),
        }
    }
}

#[async_trait]
impl<S: PullSource + 'static> PullSource for BoundedWait<S> {
    type Item = Option<S::Item>;
    type Final = S::Final;

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        let Some(mut fut) = self.upstream.take_future() else {
            return Err(EngineError::StreamClosed);
        };
        match tokio::time::timeout(self.timeout, &mut fut).await {
            Ok((source, result)) => match result {
                Ok(Pulled::Item(item)) => {
                    self.upstream = UpstreamSlot::Ready(source);
                    Ok(Pulled::Item(Some(item)))
                }
                Ok(Pulled::Done(fin)) => Ok(Pulled::Done(fin)),
                Err(err) => Err(err),
            },
            Err(_elapsed) => {
                self.upstream = UpstreamSlot::InFlight(fut);
                tracing::debug!(
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "upstream pull outlived deadline; settlement retained"
                );
                match self.mode {
                    TimeoutMode::Retry => Ok(Pulled::Item(None)),
                    TimeoutMode::Error => Err(EngineError::TimeoutExceeded {
                        waited_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            }
        }
    }
}

/// Fixed-window stage: accumulates exactly `size` upstream values per
/// yielded batch.
///
/// On upstream exhaustion mid-window, the `len < size` remainder is returned
/// as the completion value, never as a yielded item.
pub struct FixedWindow<S> {
    source: S,
    size: usize,
    done: bool,
}

impl<S: PullSource<Final = ()>> FixedWindow<S> {
    /// Wrap `source`, batching `size` items per window.
    pub const fn new(source: S, size: usize) -> Self {
        Self {
            source,
            size,
            done: false,
        }
    }
}

#[async_trait]
impl<S: PullSource<Final = ()>> PullSource for FixedWindow<S> {
    type Item = Vec<S::Item>;
    type Final = Vec<S::Item>;

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        if self.done {
            return Err(EngineError::StreamClosed);
        }
        let mut window = Vec::with_capacity(self.size);
        loop {
            match self.source.pull().await? {
                Pulled::Item(item) => {
                    window.push(item);
                    if window.len() >= self.size {
                        return Ok(Pulled::Item(window));
                    }
                }
                Pulled::Done(()) => {
                    self.done = true;
                    return Ok(Pulled::Done(window));
                }
            }
        }
    }
}

/// Window-with-deadline stage: accumulates up to `size` values, flushing
/// early when the per-window deadline elapses.
///
/// The deadline restarts when a window begins, not per item. A pull that is
/// in flight when the deadline fires is retained for the next window. On
/// upstream exhaustion, whatever is buffered becomes the completion value.
pub struct DeadlineWindow<S: PullSource> {
    size: usize,
    deadline: Duration,
    upstream: UpstreamSlot<S>,
}

impl<S: PullSource<Final = ()> + 'static> DeadlineWindow<S> {
    /// Wrap `source` with a window of `size` items or `deadline`, whichever
    /// fills first.
    pub const fn new(source: S, size: usize, deadline: Duration) -> Self {
        Self {
            size,
            deadline,
            upstream: UpstreamSlot::Ready(source),
        }
    }
}

#[async_trait]
impl<S: PullSource<Final = ()> + 'static> PullSource for DeadlineWindow<S> {
    type Item = Vec<S::Item>;
    type Final = Vec<S::Item>;

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        let mut window = Vec::with_capacity(self.size);
        let sleep = tokio::time::sleep(self.deadline);
        tokio::pin!(sleep);
        loop {
            let Some(mut fut) = self.upstream.take_future() else {
                return Err(EngineError::StreamClosed);
            };
            tokio::select! {
                (source, result) = &mut fut => {
                    match result {
                        Ok(Pulled::Item(item)) => {
                            self.upstream = UpstreamSlot::Ready(source);
                            window.push(item);
                            if window.len() >= self.size {
                                return Ok(Pulled::Item(window));
                            }
                        }
                        Ok(Pulled::Done(())) => return Ok(Pulled::Done(window)),
                        Err(err) => return Err(err),
                    }
                }
                () = &mut sleep => {
                    self.upstream = UpstreamSlot::InFlight(fut);
                    if window.is_empty() {
                        // Nothing to flush; the window re-begins.
                        sleep.as_mut().reset(tokio::time::Instant::now() + self.deadline);
                    } else {
                        return Ok(Pulled::Item(window));
                    }
                }
            }
        }
    }
}

type KeyFn<T> = Box<dyn Fn(&T) -> String + Send>;

/// Turnstile stage: a pass-through checkpoint reporting to a
/// [`ChainCollector`].
///
/// Passes are correlated across checkpoints by arrival order (FIFO) or, when
/// constructed with [`Turnstile::keyed`], by an explicit per-item key.
pub struct Turnstile<S: PullSource> {
    source: S,
    checkpoint: String,
    collector: Arc<ChainCollector>,
    key_fn: Option<KeyFn<S::Item>>,
}

impl<S: PullSource> Turnstile<S> {
    /// FIFO-correlated checkpoint.
    pub fn new(
        source: S,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
    ) -> Self {
        Self {
            source,
            checkpoint: checkpoint.into(),
            collector,
            key_fn: None,
        }
    }

    /// Key-correlated checkpoint for reordering pipelines.
    pub fn keyed(
        source: S,
        checkpoint: impl Into<String>,
        collector: Arc<ChainCollector>,
        key_fn: impl Fn(&S::Item) -> String + Send + 'static,
    ) -> Self {
        Self {
            source,
            checkpoint: checkpoint.into(),
            collector,
            key_fn: Some(Box::new(key_fn)),
        }
    }
}

#[async_trait]
impl<S: PullSource> PullSource for Turnstile<S> {
    type Item = S::Item;
    type Final = S::Final;

    async fn pull(&mut self) -> PullResult<Self::Item, Self::Final> {
        let result = self.source.pull().await?;
        if let Pulled::Item(item) = &result {
            let key = self.key_fn.as_ref().map(|f| f(item));
            self.collector.record_pass(&self.checkpoint, key);
        }
        Ok(result)
    }
}
