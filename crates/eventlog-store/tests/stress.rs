//! Stress tests for eventlog-store
//!
//! These tests verify store behavior under high ingest load, concurrent
//! producers and subscribers, and barrel churn through the pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eventlog_store::{EventLogMessage, EventLogStore, MemorySink, StoreConfig};

// ============================================================================
// Throughput Tests
// ============================================================================

/// Insert 50,000 messages spread over 100 streams
#[tokio::test]
async fn test_insert_throughput() {
    eventlog_logging::init_testing();
    let sink = Arc::new(MemorySink::new());
    let config = StoreConfig::default().with_barrel_buffer_limit(100_000);
    let store = EventLogStore::new(config, sink.clone()).unwrap();
    let message_count: usize = 50_000;

    let start = Instant::now();
    for i in 0..message_count {
        store.insert_message(EventLogMessage::new(format!("stream-{}", i % 100), "line"));
    }
    let duration = start.elapsed();
    println!(
        "Inserted {} messages in {:?} ({:.2} msgs/sec)",
        message_count,
        duration,
        message_count as f64 / duration.as_secs_f64()
    );

    assert_eq!(store.barrel_count(), 100);
    assert_eq!(store.total_messages(), message_count as u64);

    store.stop().await;
    assert_eq!(sink.message_count(), message_count);
    assert_eq!(sink.call_count(), 100);
}

// ============================================================================
// Concurrent Access Tests
// ============================================================================

/// Many threads writing to one stream lose nothing and create one barrel
#[test]
fn test_concurrent_inserts_same_stream() {
    eventlog_logging::init_testing();
    let config = StoreConfig::default().with_barrel_buffer_limit(1_000_000);
    let store = EventLogStore::new(config, Arc::new(MemorySink::new())).unwrap();
    let threads = 8;
    let per_thread = 1_000;

    std::thread::scope(|scope| {
        for t in 0..threads {
            let store = &store;
            scope.spawn(move || {
                for seq in 0..per_thread {
                    store.insert_message(
                        EventLogMessage::new("shared", format!("t{t}-{seq}")).with_sequence(seq),
                    );
                }
            });
        }
    });

    assert_eq!(store.barrel_count(), 1);
    assert_eq!(store.pool().created_count(), 1);
    let buffered = store.barrel("shared").unwrap().buffered();
    assert_eq!(buffered.len(), threads * per_thread as usize);

    // Each producer's own messages keep their order
    for t in 0..threads {
        let prefix = format!("t{t}-");
        let sequences: Vec<u64> = buffered
            .iter()
            .filter(|m| m.text().starts_with(&prefix))
            .map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, (0..per_thread).collect::<Vec<_>>());
    }
}

/// Early flushes triggered by full buffers race with inserts; every message
/// still reaches the sink exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_with_persistence_commands() {
    eventlog_logging::init_testing();
    let sink = Arc::new(MemorySink::new());
    let config = StoreConfig::default().with_barrel_buffer_limit(64);
    let store = Arc::new(EventLogStore::new(config, sink.clone()).unwrap());
    store.run().unwrap();

    let mut handles = vec![];
    for producer in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for seq in 0..500 {
                store.insert_message(EventLogMessage::new(
                    format!("stream-{}", producer % 3),
                    format!("p{producer}-{seq}"),
                ));
                if seq % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.expect("Task panicked");
    }

    store.stop().await;

    assert_eq!(sink.message_count(), 5_000);
    assert!(sink.call_count() >= 3);
    for stream in 0..3 {
        assert_eq!(store.barrel(&format!("stream-{stream}")).unwrap().buffered_len(), 0);
    }
}

/// Subscribers coming and going while producers write
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_and_insert() {
    eventlog_logging::init_testing();
    let config = StoreConfig::default().with_subscriber_queue_capacity(10_000);
    let store = Arc::new(EventLogStore::new(config, Arc::new(MemorySink::new())).unwrap());

    let steady = store.subscribe("live", "steady").unwrap();

    let producer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for seq in 0..2_000 {
                store.insert_message(EventLogMessage::new("live", format!("m{seq}")));
                if seq % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let churner = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for round in 0..200 {
                let id = format!("viewer-{}", round % 5);
                let _queue = store.subscribe("live", &id).unwrap();
                tokio::task::yield_now().await;
                store.unsubscribe("live", &id);
            }
        })
    };

    producer.await.expect("Producer panicked");
    churner.await.expect("Churner panicked");

    // The steady subscriber sees every message in order
    let texts: Vec<String> = steady.drain().map(|m| m.text().into_owned()).collect();
    let expected: Vec<String> = (0..2_000).map(|seq| format!("m{seq}")).collect();
    assert_eq!(texts, expected);
    assert_eq!(store.barrel("live").unwrap().subscriber_count(), 1);
}

// ============================================================================
// Barrel Churn Tests
// ============================================================================

/// Short-lived streams cycle through the pool without leaking state
#[tokio::test(start_paused = true)]
async fn test_barrel_churn_through_pool() {
    eventlog_logging::init_testing();
    let sink = Arc::new(MemorySink::new());
    let store = EventLogStore::new(StoreConfig::default(), sink.clone()).unwrap();
    let capacity = store.config().pool_capacity;
    let streams = 500;

    for i in 0..streams {
        store.insert_message(EventLogMessage::new(format!("first-{i}"), "a"));
    }
    tokio::time::advance(Duration::from_secs(61)).await;

    let report = store.collect_garbage().await;
    assert_eq!(report.collected, streams);
    assert_eq!(report.pooled, capacity);
    assert_eq!(store.barrel_count(), 0);
    assert_eq!(sink.call_count(), streams);

    for i in 0..streams {
        store.insert_message(EventLogMessage::new(format!("second-{i}"), "b"));
    }

    assert_eq!(store.pool().reused_count(), capacity);
    assert_eq!(store.pool().created_count(), streams * 2 - capacity);
    assert_eq!(store.pool().idle_count(), 0);
    for i in 0..streams {
        let barrel = store.barrel(&format!("second-{i}")).unwrap();
        assert_eq!(barrel.name(), format!("second-{i}"));
        assert_eq!(barrel.buffered_len(), 1);
        assert_eq!(barrel.subscriber_count(), 0);
    }
}
