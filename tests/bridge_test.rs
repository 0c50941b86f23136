//! Integration tests for the push/pull bridge.

use std::time::Duration;

use prometheus_conduit::stream::{bridge, PullPipeline, PullSource, Pulled, PushSink};

#[tokio::test]
async fn test_producer_consumer_fifo_across_tasks() {
    let (tx, mut rx) = bridge();

    let producer = tokio::spawn(async move {
        for i in 0..20 {
            tx.push(i);
            if i % 5 == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        tx.close();
    });

    let mut received = Vec::new();
    loop {
        match rx.pull().await.unwrap() {
            Pulled::Item(v) => received.push(v),
            Pulled::Done(()) => break,
        }
    }
    producer.await.unwrap();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_rate_mismatch_surfaces_as_depth() {
    let (tx, mut rx) = bridge();
    for i in 0..50 {
        tx.push(i);
    }
    // The producer is never back-pressured; the mismatch is visible as
    // buffer growth.
    assert_eq!(tx.depth(), 50);

    assert_eq!(rx.pull().await.unwrap(), Pulled::Item(0));
    assert_eq!(tx.depth(), 49);
}

#[tokio::test]
async fn test_bridge_feeds_pull_pipeline() {
    let (tx, rx) = bridge();
    for i in 0..7 {
        tx.push(i);
    }
    tx.close();

    let (windows, remainder) = PullPipeline::new(rx).fixed_window(3).collect().await.unwrap();
    assert_eq!(windows, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    assert_eq!(remainder, vec![6]);
}

#[tokio::test]
async fn test_bridge_push_face_is_a_sink() {
    let (tx, mut rx) = bridge();
    let mut sink = tx.clone();
    sink.accept(1).await.unwrap();
    sink.accept(2).await.unwrap();
    sink.finish().await.unwrap();

    assert_eq!(rx.pull().await.unwrap(), Pulled::Item(1));
    assert_eq!(rx.pull().await.unwrap(), Pulled::Item(2));
    assert_eq!(rx.pull().await.unwrap(), Pulled::Done(()));
}

#[tokio::test]
async fn test_concurrent_producers_all_delivered() {
    let (tx, mut rx) = bridge();

    let mut producers = Vec::new();
    for i in 0..10_u32 {
        let tx = tx.clone();
        producers.push(tokio::spawn(async move {
            for j in 0..10_u32 {
                tx.push(i * 10 + j);
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in futures::future::join_all(producers).await {
        producer.unwrap();
    }
    tx.close();

    let mut received = Vec::new();
    loop {
        match rx.pull().await.unwrap() {
            Pulled::Item(v) => received.push(v),
            Pulled::Done(()) => break,
        }
    }
    received.sort_unstable();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
}
