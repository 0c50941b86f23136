//! Integration tests for push pipelines.
//!
//! Includes the serialized concurrent-producer scenario: a serializer, a
//! seeded ~20% drop filter, and a window of 10 fed by 80 concurrent pushes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_conduit::core::{AppResult, EngineError};
use prometheus_conduit::stream::{
    FanOut, PushCoroutine, PushPipeline, PushSink, Resumed, RoundRobin, VecSink,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[tokio::test]
async fn test_serializer_filter_window_under_concurrent_pushes() {
    let sink = VecSink::<Vec<u32>>::new();
    let accepted = Arc::new(AtomicUsize::new(0));

    let rng = Arc::new(parking_lot::Mutex::new(StdRng::seed_from_u64(42)));
    let accepted_in_predicate = Arc::clone(&accepted);
    let (pipeline, _handle) = PushPipeline::new(sink.clone())
        .fixed_window(10)
        .filter(move |_item: &u32| {
            let pass = rng.lock().random_bool(0.8);
            if pass {
                accepted_in_predicate.fetch_add(1, Ordering::AcqRel);
            }
            pass
        });
    let entry = pipeline.serializer().into_sink();

    let mut producers = Vec::new();
    for i in 0..80_u32 {
        let mut entry = entry.clone();
        producers.push(tokio::spawn(async move { entry.accept(i).await }));
    }
    for producer in futures::future::join_all(producers).await {
        producer.unwrap().unwrap();
    }

    // Before finish: only full windows have been delivered downstream.
    let accepted = accepted.load(Ordering::Acquire);
    let batches = sink.items();
    assert_eq!(batches.len(), accepted / 10);
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, accepted - (accepted % 10));
    assert!(batches.iter().all(|batch| batch.len() == 10));
}

#[tokio::test]
async fn test_push_fixed_window_flushes_remainder_on_finish() {
    let sink = VecSink::<Vec<u32>>::new();
    let mut window = PushPipeline::new(sink.clone()).fixed_window(3).into_sink();

    for i in 0..7 {
        window.accept(i).await.unwrap();
    }
    assert_eq!(sink.items(), vec![vec![0, 1, 2], vec![3, 4, 5]]);

    window.finish().await.unwrap();
    assert_eq!(sink.items().last().unwrap(), &vec![6]);
}

#[tokio::test]
async fn test_filter_predicate_replaceable_at_runtime() {
    let sink = VecSink::<u32>::new();
    let (pipeline, handle) = PushPipeline::new(sink.clone()).filter(|_item| true);
    let mut entry = pipeline.into_sink();

    entry.accept(1).await.unwrap();
    // Shed everything from here on.
    handle.replace(|_item| false);
    entry.accept(2).await.unwrap();
    entry.accept(3).await.unwrap();

    assert_eq!(sink.items(), vec![1]);
}

#[tokio::test]
async fn test_push_deadline_window_flushes_stale_buffer_on_delivery() {
    let sink = VecSink::<Vec<u32>>::new();
    let mut window = PushPipeline::new(sink.clone())
        .window_with_deadline(10, Duration::from_millis(30))
        .into_sink();

    window.accept(1).await.unwrap();
    window.accept(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    // The buffered pair went stale; this delivery flushes it first and
    // starts a fresh window.
    window.accept(3).await.unwrap();
    assert_eq!(sink.items(), vec![vec![1, 2]]);

    window.finish().await.unwrap();
    assert_eq!(sink.items(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test]
async fn test_fan_out_duplicates_deliveries() {
    let left = VecSink::<u32>::new();
    let right = VecSink::<u32>::new();
    let mut fan = FanOut::new(vec![left.clone(), right.clone()]);

    for i in 0..3 {
        fan.accept(i).await.unwrap();
    }
    fan.finish().await.unwrap();

    assert_eq!(left.items(), vec![0, 1, 2]);
    assert_eq!(right.items(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_round_robin_distributes_deliveries() {
    let a = VecSink::<u32>::new();
    let b = VecSink::<u32>::new();
    let mut robin = RoundRobin::new(vec![a.clone(), b.clone()]);

    for i in 0..6 {
        robin.accept(i).await.unwrap();
    }

    assert_eq!(a.items(), vec![0, 2, 4]);
    assert_eq!(b.items(), vec![1, 3, 5]);
}

/// Coroutine that sums pairs of inputs, emitting one output per two inputs.
/// Priming must happen before it can accept meaningful input.
struct PairSummer {
    primed: bool,
    pending: Option<u32>,
}

#[async_trait]
impl PushCoroutine for PairSummer {
    type Input = u32;
    type Output = u32;

    async fn resume(&mut self, input: Option<u32>) -> AppResult<Resumed<u32>> {
        let Some(value) = input else {
            // The priming resume carries no input by construction.
            self.primed = true;
            return Ok(Resumed::Yielded(Vec::new()));
        };
        assert!(self.primed, "input delivered before priming");
        match self.pending.take() {
            Some(first) => Ok(Resumed::Yielded(vec![first + value])),
            None => {
                self.pending = Some(value);
                Ok(Resumed::Yielded(Vec::new()))
            }
        }
    }
}

#[tokio::test]
async fn test_coroutine_stage_is_primed_internally() {
    use prometheus_conduit::stream::CoroutineState;

    let sink = VecSink::<u32>::new();
    let mut stage = PushPipeline::new(sink.clone())
        .coroutine(PairSummer {
            primed: false,
            pending: None,
        })
        .into_sink();
    assert_eq!(stage.state(), CoroutineState::NotStarted);

    for i in [1, 2, 10, 20] {
        stage.accept(i).await.unwrap();
    }
    stage.finish().await.unwrap();

    assert_eq!(stage.state(), CoroutineState::AwaitingInput);
    assert_eq!(sink.items(), vec![3, 30]);
}

#[tokio::test]
async fn test_serializer_keeps_downstream_sequential() {
    /// Sink that panics if two accepts ever overlap.
    struct OverlapGuard {
        busy: Arc<AtomicUsize>,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PushSink for OverlapGuard {
        type Item = u32;

        async fn accept(&mut self, _item: u32) -> Result<(), EngineError> {
            let before = self.busy.fetch_add(1, Ordering::AcqRel);
            assert_eq!(before, 0, "concurrent delivery reached the sink");
            tokio::task::yield_now().await;
            self.busy.fetch_sub(1, Ordering::AcqRel);
            self.count.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    let count = Arc::new(AtomicUsize::new(0));
    let guard = OverlapGuard {
        busy: Arc::new(AtomicUsize::new(0)),
        count: Arc::clone(&count),
    };
    let entry = PushPipeline::new(guard).serializer().into_sink();

    let mut producers = Vec::new();
    for i in 0..50_u32 {
        let mut entry = entry.clone();
        producers.push(tokio::spawn(async move { entry.accept(i).await }));
    }
    for producer in futures::future::join_all(producers).await {
        producer.unwrap().unwrap();
    }
    assert_eq!(count.load(Ordering::Acquire), 50);
}
