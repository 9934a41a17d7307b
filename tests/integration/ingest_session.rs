//! Integration tests for agent sessions on the ingest listener
//!
//! These run against a real TCP listener and verify the per-line reply
//! protocol, error isolation within a session and persistence across
//! sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;

#[tokio::test]
async fn test_session_recovers_from_a_malformed_line() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store.clone(), publisher).await;

    let (mut replies, mut tx) = connect_agent(harness.addr).await;

    send_line(&mut tx, "{broken json").await;
    send_line(&mut tx, &probe_line(1, false)).await;
    send_line(&mut tx, &probe_line(1, true)).await;

    let first = replies.next_line().await.unwrap().unwrap();
    assert!(first.starts_with("ERROR:"), "got: {first}");
    assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");
    assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");

    // only the two valid reports were persisted
    assert_eq!(store.probes().await.len(), 2);
}

#[tokio::test]
async fn test_reports_persist_across_sessions() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store.clone(), publisher).await;

    for _ in 0..2 {
        let (mut replies, mut tx) = connect_agent(harness.addr).await;
        send_line(&mut tx, &probe_line(1, true)).await;
        assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");
        // connection drops here
    }

    assert_eq!(store.probes().await.len(), 2);
}

#[tokio::test]
async fn test_unknown_host_is_stored_without_alerting() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store.clone(), publisher.clone()).await;

    let (mut replies, mut tx) = connect_agent(harness.addr).await;
    send_line(&mut tx, &probe_line(999, false)).await;

    assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");
    assert_eq!(store.probes().await.len(), 1);
    assert!(publisher.published.lock().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_agents_all_get_their_replies() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store.clone(), publisher).await;

    let mut agents = Vec::new();
    for _ in 0..5 {
        let addr = harness.addr;
        agents.push(tokio::spawn(async move {
            let (mut replies, mut tx) = connect_agent(addr).await;
            for _ in 0..10 {
                send_line(&mut tx, &probe_line(1, true)).await;
                assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");
            }
        }));
    }

    for agent in agents {
        agent.await.unwrap();
    }

    assert_eq!(store.probes().await.len(), 50);
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let store = seeded_store().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let harness = spawn_ingest(store, publisher).await;

    let (mut replies, _tx) = connect_agent(harness.addr).await;
    harness.shutdown.send(true).unwrap();

    let eof = tokio::time::timeout(Duration::from_secs(1), replies.next_line())
        .await
        .expect("session should close promptly on shutdown");
    assert!(matches!(eof, Ok(None) | Err(_)));
}
