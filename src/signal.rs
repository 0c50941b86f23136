//! Async wait signal.
//!
//! This module provides a reusable async gate that suspends one or more
//! waiters until explicitly woken or torn down.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

/// How a [`WaitSignal::wait`] call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The signal was fired while this waiter was parked.
    Signaled,
    /// The signal has been closed; no further wake-ups will ever arrive.
    Closed,
}

#[derive(Default)]
struct SignalState {
    closed: bool,
    epoch: u64,
    wakers: Vec<Waker>,
}

/// A reusable async gate.
///
/// `wait()` suspends the caller until `signal()` or `close()` is invoked.
/// `signal()` wakes all waiters that were parked before it fired. After
/// `close()`, every current and future `wait()` resolves immediately with
/// [`SignalOutcome::Closed`].
///
/// The wait future captures the signal epoch at creation time, so the
/// race-free idiom is to create the future *before* checking the guarded
/// condition:
///
/// ```
/// # async fn demo(signal: &prometheus_conduit::signal::WaitSignal, ready: impl Fn() -> bool) {
/// loop {
///     let wait = signal.wait();
///     if ready() {
///         break;
///     }
///     wait.await;
/// }
/// # }
/// ```
///
/// A `signal()` that fires between the condition check and the `.await` is
/// then never lost: the epoch has moved on and the future resolves on its
/// first poll.
#[derive(Default)]
pub struct WaitSignal {
    state: Mutex<SignalState>,
}

impl WaitSignal {
    /// Create an open signal with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the next `signal()` or `close()`.
    ///
    /// The returned future is armed immediately: any signal fired after this
    /// call (even before the future is first polled) resolves it.
    #[must_use]
    pub fn wait(&self) -> Wait<'_> {
        let entry_epoch = self.state.lock().epoch;
        Wait {
            signal: self,
            entry_epoch,
        }
    }

    /// Wake all currently parked waiters.
    pub fn signal(&self) {
        let wakers = {
            let mut state = self.state.lock();
            state.epoch = state.epoch.wrapping_add(1);
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Close the signal. All current and future waits resolve with
    /// [`SignalOutcome::Closed`].
    pub fn close(&self) {
        let wakers = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for WaitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WaitSignal")
            .field("closed", &state.closed)
            .field("epoch", &state.epoch)
            .field("waiters", &state.wakers.len())
            .finish()
    }
}

/// Future returned by [`WaitSignal::wait`].
#[must_use = "a wait future does nothing unless awaited"]
pub struct Wait<'a> {
    signal: &'a WaitSignal,
    entry_epoch: u64,
}

impl Future for Wait<'_> {
    type Output = SignalOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.signal.state.lock();
        if state.closed {
            return Poll::Ready(SignalOutcome::Closed);
        }
        if state.epoch != self.entry_epoch {
            return Poll::Ready(SignalOutcome::Signaled);
        }
        // Register-then-recheck under the same lock; re-polls must not pile
        // up duplicate wakers.
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
