//! Bridge between a push-side producer and a pull-side consumer.
//!
//! Both faces share one buffer coordinated by a [`WaitSignal`]. No pull-side
//! backpressure is propagated to the producer; rate mismatch surfaces only
//! as buffer growth, observable via [`BridgePush::depth`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::error::EngineError;
use crate::signal::WaitSignal;
use crate::stream::pull::{PullResult, PullSource, Pulled};
use crate::stream::push::PushSink;

struct BridgeShared<T> {
    buffer: Mutex<VecDeque<T>>,
    signal: WaitSignal,
}

/// Create a connected push face / pull face pair.
#[must_use]
pub fn bridge<T: Send>() -> (BridgePush<T>, BridgePull<T>) {
    let shared = Arc::new(BridgeShared {
        buffer: Mutex::new(VecDeque::new()),
        signal: WaitSignal::new(),
    });
    (
        BridgePush {
            shared: Arc::clone(&shared),
        },
        BridgePull {
            shared,
            done: false,
        },
    )
}

/// Push-accepting face of a bridge. Cloneable; every delivery appends to the
/// shared buffer and wakes any blocked pull.
pub struct BridgePush<T> {
    shared: Arc<BridgeShared<T>>,
}

impl<T> Clone for BridgePush<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BridgePush<T> {
    /// Deliver a value. Never blocks: the producer does not wait for
    /// readiness signals.
    pub fn push(&self, value: T) {
        self.shared.buffer.lock().push_back(value);
        self.shared.signal.signal();
    }

    /// Signal end-of-stream. The pull side completes once the buffer is
    /// drained.
    pub fn close(&self) {
        self.shared.signal.close();
    }

    /// Current buffer depth - the externally observable measure of
    /// producer/consumer rate mismatch.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.buffer.lock().len()
    }
}

#[async_trait]
impl<T: Send> PushSink for BridgePush<T> {
    type Item = T;

    async fn accept(&mut self, item: T) -> Result<(), EngineError> {
        self.push(item);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), EngineError> {
        self.close();
        Ok(())
    }
}

/// Pull-producing face of a bridge.
pub struct BridgePull<T> {
    shared: Arc<BridgeShared<T>>,
    done: bool,
}

#[async_trait]
impl<T: Send + 'static> PullSource for BridgePull<T> {
    type Item = T;
    type Final = ();

    async fn pull(&mut self) -> PullResult<T, ()> {
        if self.done {
            return Err(EngineError::StreamClosed);
        }
        loop {
            // Arm the wait before inspecting the buffer so a push landing
            // in between is never lost.
            let wait = self.shared.signal.wait();
            if let Some(value) = self.shared.buffer.lock().pop_front() {
                return Ok(Pulled::Item(value));
            }
            if self.shared.signal.is_closed() {
                self.done = true;
                return Ok(Pulled::Done(()));
            }
            wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_across_bridge() {
        let (tx, mut rx) = bridge();
        tx.push(1);
        tx.push(2);
        tx.push(3);
        tx.close();
        assert_eq!(rx.pull().await.unwrap(), Pulled::Item(1));
        assert_eq!(rx.pull().await.unwrap(), Pulled::Item(2));
        assert_eq!(rx.pull().await.unwrap(), Pulled::Item(3));
        assert_eq!(rx.pull().await.unwrap(), Pulled::Done(()));
    }

    #[tokio::test]
    async fn test_pull_blocks_until_push() {
        let (tx, mut rx) = bridge();
        let consumer = tokio::spawn(async move { rx.pull().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!consumer.is_finished());
        tx.push(42);
        assert_eq!(consumer.await.unwrap().unwrap(), Pulled::Item(42));
    }

    #[tokio::test]
    async fn test_close_drains_then_completes() {
        let (tx, mut rx) = bridge();
        tx.push(7);
        tx.close();
        // Items delivered before close are still drained.
        assert_eq!(rx.pull().await.unwrap(), Pulled::Item(7));
        assert_eq!(rx.pull().await.unwrap(), Pulled::Done(()));
        assert!(matches!(rx.pull().await, Err(EngineError::StreamClosed)));
    }
}
