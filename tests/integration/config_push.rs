//! Integration tests for config pushes through the connection registry

use std::sync::Arc;
use std::time::Duration;

use pulsewatch::MonitorEntry;
use pulsewatch::util::from_json_case_insensitive;

use crate::helpers::*;

fn sample_entries() -> Vec<MonitorEntry> {
    vec![
        MonitorEntry {
            id: 1,
            host: "web-1.example.com".to_string(),
            interval_minutes: 5,
            protocol: 2,
        },
        MonitorEntry {
            id: 2,
            host: "db-1.example.com".to_string(),
            interval_minutes: 1,
            protocol: 3,
        },
    ]
}

async fn wait_for_connections(harness: &IngestHarness, expected: usize) {
    for _ in 0..200 {
        if harness.registry.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "registry never reached {expected} connections, has {}",
        harness.registry.connection_count().await
    );
}

#[tokio::test]
async fn test_push_reaches_every_connected_agent() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store, publisher).await;

    let (mut replies_a, _tx_a) = connect_agent(harness.addr).await;
    let (mut replies_b, _tx_b) = connect_agent(harness.addr).await;
    wait_for_connections(&harness, 2).await;

    let entries = sample_entries();
    harness.registry.broadcast(&entries).await;

    for replies in [&mut replies_a, &mut replies_b] {
        let line = replies.next_line().await.unwrap().unwrap();
        let received: Vec<MonitorEntry> = from_json_case_insensitive(&line).unwrap();
        assert_eq!(received, entries);
    }
}

#[tokio::test]
async fn test_disconnected_agent_leaves_the_registry() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store, publisher).await;

    let (replies, tx) = connect_agent(harness.addr).await;
    wait_for_connections(&harness, 1).await;

    drop(replies);
    drop(tx);
    wait_for_connections(&harness, 0).await;

    // a push with nobody connected is a no-op, not an error
    harness.registry.broadcast(&sample_entries()).await;
    assert_eq!(harness.registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_push_interleaves_with_replies_without_tearing_lines() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store, publisher).await;

    let (mut replies, mut tx) = connect_agent(harness.addr).await;
    wait_for_connections(&harness, 1).await;

    // fire pushes while a report is in flight
    let registry = harness.registry.clone();
    let pusher = tokio::spawn(async move {
        for _ in 0..3 {
            registry.broadcast(&sample_entries()).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
    send_line(&mut tx, &probe_line(1, true)).await;
    pusher.await.unwrap();

    // 4 lines total, in whatever order; each must be a clean frame
    let mut oks = 0;
    let mut pushes = 0;
    for _ in 0..4 {
        let line = replies.next_line().await.unwrap().unwrap();
        if line == "OK" {
            oks += 1;
        } else {
            let received: Vec<MonitorEntry> = from_json_case_insensitive(&line).unwrap();
            assert_eq!(received, sample_entries());
            pushes += 1;
        }
    }

    assert_eq!(oks, 1);
    assert_eq!(pushes, 3);
}
