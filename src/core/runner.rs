//! Scheduled task runner: capacity-gated draining of a peekable task source.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::capacity::CapacityPool;
use crate::core::error::EngineError;
use crate::core::task::{Progress, ScheduledTask, StepOutcome, TaskBody};
use crate::infra::source::TaskSource;
use crate::runtime::Spawn;
use crate::signal::{SignalOutcome, WaitSignal};
use crate::stream::bridge::{bridge, BridgePull, BridgePush};
use crate::stream::pull::{PullSource, Pulled};
use crate::util::serde::{RunId, TaskKey};

/// Lifecycle of one runner drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not yet draining.
    Idle,
    /// Peeking the source, admitting work.
    Filling,
    /// At least one task has been admitted.
    Running,
    /// Source exhausted and all spawned tasks settled.
    Drained,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifier of this drain.
    pub run_id: RunId,
    /// Tasks that emitted a final envelope.
    pub completed: usize,
    /// Tasks that failed.
    pub failed: usize,
}

/// Drains a peekable task source against a capacity or quota pool.
///
/// The drain protocol per task: (1) peek without consuming, (2) check
/// `can_acquire(cost)`, suspending on the pool's wait signal until it holds,
/// (3) consume the task and `try_acquire` its cost, (4) spawn the task body,
/// emitting progress envelopes, (5) release the cost on settlement (a no-op
/// under a quota pool) and invoke callbacks. No task is dequeued before its
/// cost is known to be satisfiable, so a too-expensive head task is never
/// pulled out only to stall while holding nothing.
///
/// Admission order is whatever the source yields: FIFO for
/// [`InMemoryTaskSource`](crate::infra::source::memory::InMemoryTaskSource),
/// dependency/priority order for
/// [`DagTaskSource`](crate::infra::source::dag::DagTaskSource).
pub struct ScheduledTaskRunner<T, Src, Sp> {
    source: Src,
    pool: Arc<dyn CapacityPool>,
    spawner: Sp,
    continue_on_error: bool,
    _result: PhantomData<fn() -> T>,
}

impl<T, Src, Sp> ScheduledTaskRunner<T, Src, Sp>
where
    T: Send + 'static,
    Src: TaskSource<T> + 'static,
    Sp: Spawn + Clone + Send + 'static,
{
    /// Create a runner. Task failures default to the non-fatal path: an
    /// error envelope is emitted and draining continues.
    pub fn new(source: Src, pool: Arc<dyn CapacityPool>, spawner: Sp) -> Self {
        Self {
            source,
            pool,
            spawner,
            continue_on_error: true,
            _result: PhantomData,
        }
    }

    /// Select the failure path: `true` emits error envelopes and continues
    /// draining; `false` makes the first task failure fatal for the run.
    #[must_use]
    pub const fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Start draining. Envelopes stream out of the returned run while the
    /// drain proceeds in the background.
    #[must_use]
    pub fn run(self) -> TaskRun<T> {
        let (tx, rx) = bridge();
        let driver = tokio::spawn(drive(
            self.source,
            self.pool,
            self.spawner,
            self.continue_on_error,
            tx,
        ));
        TaskRun {
            envelopes: rx,
            driver,
        }
    }
}

/// A running drain: a pull source of progress envelopes plus the final
/// summary.
pub struct TaskRun<T> {
    envelopes: BridgePull<Progress<T>>,
    driver: tokio::task::JoinHandle<Result<RunSummary, EngineError>>,
}

impl<T: Send + 'static> TaskRun<T> {
    /// The envelope stream. Completes once the run is drained.
    pub fn envelopes(&mut self) -> &mut BridgePull<Progress<T>> {
        &mut self.envelopes
    }

    /// Next envelope, or `None` once the run is drained.
    pub async fn next_envelope(&mut self) -> Option<Progress<T>> {
        match self.envelopes.pull().await {
            Ok(Pulled::Item(envelope)) => Some(envelope),
            Ok(Pulled::Done(())) | Err(_) => None,
        }
    }

    /// Await the drain and return its summary. On the fatal failure path
    /// this propagates the first task error.
    pub async fn finish(self) -> Result<RunSummary, EngineError> {
        match self.driver.await {
            Ok(result) => result,
            Err(join_error) => Err(EngineError::Backend(format!(
                "run driver panicked: {join_error}"
            ))),
        }
    }
}

struct RunProgress {
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    settled: WaitSignal,
    fatal: Mutex<Option<EngineError>>,
}

async fn drive<T, Src, Sp>(
    mut source: Src,
    pool: Arc<dyn CapacityPool>,
    spawner: Sp,
    continue_on_error: bool,
    envelopes: BridgePush<Progress<T>>,
) -> Result<RunSummary, EngineError>
where
    T: Send + 'static,
    Src: TaskSource<T> + 'static,
    Sp: Spawn + Clone + Send + 'static,
{
    let run_id = RunId::new_v4();
    let mut state = RunState::Idle;
    tracing::debug!(run = %run_id, ?state, pool = pool.name(), "run created");

    let progress = Arc::new(RunProgress {
        in_flight: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        settled: WaitSignal::new(),
        fatal: Mutex::new(None),
    });

    state = RunState::Filling;
    tracing::debug!(run = %run_id, ?state, "draining task source");

    loop {
        let Some(head) = source.peek() else { break };
        let cost = head.cost.clone();
        let key = head.key.clone();

        // Never dequeue before the cost is known satisfiable. Park on the
        // pool's signal; any release/reset/increment/set-limits re-checks.
        match wait_until(&pool, &progress, continue_on_error, |pool| {
            pool.can_acquire(&cost)
        })
        .await
        {
            Admission::Ready => {}
            Admission::PoolClosed => {
                tracing::warn!(run = %run_id, task = %key, "pool signal closed while parked");
                *progress.fatal.lock() = Some(EngineError::StreamClosed);
                break;
            }
            Admission::Aborted => break,
        }

        let Some(task) = source.next() else { break };

        // A competing acquirer can win between the check and the deduction;
        // the consumed task is held and retried, never dropped.
        match wait_until(&pool, &progress, continue_on_error, |pool| {
            pool.try_acquire(&cost).is_ok()
        })
        .await
        {
            Admission::Ready => {}
            Admission::PoolClosed => {
                *progress.fatal.lock() = Some(EngineError::StreamClosed);
                break;
            }
            Admission::Aborted => break,
        }

        if state == RunState::Filling {
            state = RunState::Running;
            tracing::debug!(run = %run_id, ?state, "first task admitted");
        }
        tracing::info!(run = %run_id, task = %task.key, "task admitted");

        progress.in_flight.fetch_add(1, Ordering::AcqRel);
        let pool_for_task = Arc::clone(&pool);
        let progress_for_task = Arc::clone(&progress);
        let envelopes_for_task = envelopes.clone();
        let cost_for_release = task.cost.clone();
        spawner.spawn(async move {
            execute(
                task,
                &envelopes_for_task,
                &progress_for_task,
                continue_on_error,
            )
            .await;
            pool_for_task.release(&cost_for_release);
            progress_for_task.in_flight.fetch_sub(1, Ordering::AcqRel);
            progress_for_task.settled.signal();
        });
    }

    // All admitted work must settle before the run reports drained.
    loop {
        let wait = progress.settled.wait();
        if progress.in_flight.load(Ordering::Acquire) == 0 {
            break;
        }
        wait.await;
    }
    state = RunState::Drained;
    let completed = progress.completed.load(Ordering::Acquire);
    let failed = progress.failed.load(Ordering::Acquire);
    tracing::info!(run = %run_id, ?state, completed, failed, "run drained");
    envelopes.close();

    if let Some(error) = progress.fatal.lock().take() {
        return Err(error);
    }
    Ok(RunSummary {
        run_id,
        completed,
        failed,
    })
}

enum Admission {
    Ready,
    PoolClosed,
    Aborted,
}

/// Park until `check` succeeds against the pool.
///
/// Wakes on the pool's signal (release/reset/increment/set-limits) and on
/// task settlement, re-checking the fatal flag each round so a fatal failure
/// stops admission even while parked. A quota pool's release fires no pool
/// signal, which is why settlement is watched as well.
async fn wait_until(
    pool: &Arc<dyn CapacityPool>,
    progress: &RunProgress,
    continue_on_error: bool,
    mut check: impl FnMut(&dyn CapacityPool) -> bool,
) -> Admission {
    loop {
        if !continue_on_error && progress.fatal.lock().is_some() {
            return Admission::Aborted;
        }
        let signal = pool.signal();
        let pool_wait = signal.wait();
        let settled_wait = progress.settled.wait();
        if check(pool.as_ref()) {
            return Admission::Ready;
        }
        tracing::debug!(pool = pool.name(), "insufficient capacity; parking");
        tokio::select! {
            outcome = pool_wait => {
                if outcome == SignalOutcome::Closed {
                    return Admission::PoolClosed;
                }
            }
            _ = settled_wait => {}
        }
    }
}

async fn execute<T: Send + 'static>(
    task: ScheduledTask<T>,
    envelopes: &BridgePush<Progress<T>>,
    progress: &RunProgress,
    continue_on_error: bool,
) {
    let ScheduledTask {
        key,
        body,
        on_complete,
        on_error,
        ..
    } = task;
    match body {
        TaskBody::Single(fut) => match fut.await {
            Ok(value) => {
                finish_ok(key, value, on_complete, envelopes, progress);
            }
            Err(error) => {
                finish_err(key, &error, on_error, envelopes, progress, continue_on_error);
            }
        },
        TaskBody::Stepped(mut steps) => {
            let mut on_complete = on_complete;
            let mut on_error = on_error;
            loop {
                match steps.step().await {
                    Ok(StepOutcome::Yield(value)) => {
                        envelopes.push(Progress::Intermediate {
                            key: key.clone(),
                            value,
                        });
                    }
                    Ok(StepOutcome::Complete(value)) => {
                        finish_ok(key, value, on_complete.take(), envelopes, progress);
                        break;
                    }
                    Err(error) => {
                        finish_err(
                            key,
                            &error,
                            on_error.take(),
                            envelopes,
                            progress,
                            continue_on_error,
                        );
                        break;
                    }
                }
            }
        }
    }
}

fn finish_ok<T>(
    key: TaskKey,
    value: T,
    on_complete: Option<crate::core::task::CompletionHook<T>>,
    envelopes: &BridgePush<Progress<T>>,
    progress: &RunProgress,
) {
    tracing::info!(task = %key, "task completed");
    if let Some(hook) = on_complete {
        hook(&value);
    }
    envelopes.push(Progress::Final { key, value });
    progress.completed.fetch_add(1, Ordering::AcqRel);
}

fn finish_err<T>(
    key: TaskKey,
    error: &anyhow::Error,
    on_error: Option<crate::core::task::ErrorHook>,
    envelopes: &BridgePush<Progress<T>>,
    progress: &RunProgress,
    continue_on_error: bool,
) {
    let error = EngineError::TaskFailed {
        key: key.clone(),
        reason: format!("{error:#}"),
    };
    tracing::warn!(task = %key, %error, "task failed");
    if let Some(hook) = on_error {
        hook(&error);
    }
    progress.failed.fetch_add(1, Ordering::AcqRel);
    if continue_on_error {
        envelopes.push(Progress::Error { key, error });
    } else {
        let mut slot = progress.fatal.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}
