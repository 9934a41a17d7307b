//! Integration tests for the consumer worker over a fake broker queue

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use crate::helpers::*;

#[tokio::test]
async fn test_delivered_mail_acks_the_message() {
    let queue = Arc::new(FakeQueue::default());
    let mailer = Arc::new(RecordingMailer::default());
    let harness = spawn_worker(queue.clone(), mailer.clone());

    let tag = queue.push(alert_payload(OPS_EMAIL)).await;

    assert_eq!(queue.wait_settles(1).await, vec![Settle::Ack(tag)]);
    let sent = mailer.wait_sent(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, OPS_EMAIL);
    assert_eq!(sent[0].1.down_servers, 1);

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_smtp_outage_requeues_until_redelivery_succeeds() {
    let queue = Arc::new(FakeQueue::default());
    let mailer = Arc::new(RecordingMailer {
        fail_next: AtomicU32::new(1),
        ..RecordingMailer::default()
    });
    let harness = spawn_worker(queue.clone(), mailer.clone());

    let first = queue.push(alert_payload(OPS_EMAIL)).await;
    let settles = queue.wait_settles(1).await;
    assert_eq!(
        settles,
        vec![Settle::Reject {
            tag: first,
            requeue: true
        }]
    );

    // the broker redelivers under a fresh tag
    let second = queue.push(alert_payload(OPS_EMAIL)).await;
    let settles = queue.wait_settles(2).await;
    assert_eq!(settles[1], Settle::Ack(second));
    assert_eq!(mailer.wait_sent(1).await.len(), 1);

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_poison_message_is_dropped_for_good() {
    let queue = Arc::new(FakeQueue::default());
    let mailer = Arc::new(RecordingMailer::default());
    let harness = spawn_worker(queue.clone(), mailer.clone());

    let poison = queue.push(b"certainly not an alert".to_vec()).await;
    let good = queue.push(alert_payload(OPS_EMAIL)).await;

    let settles = queue.wait_settles(2).await;
    assert_eq!(
        settles,
        vec![
            Settle::Reject {
                tag: poison,
                requeue: false
            },
            Settle::Ack(good),
        ]
    );
    // only the good message produced mail
    assert_eq!(mailer.wait_sent(1).await.len(), 1);

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_consumer_resumes_after_losing_the_stream() {
    let queue = Arc::new(FakeQueue::default());
    let mailer = Arc::new(RecordingMailer::default());
    let harness = spawn_worker(queue.clone(), mailer.clone());

    let first = queue.push(alert_payload(OPS_EMAIL)).await;
    assert_eq!(queue.wait_settles(1).await, vec![Settle::Ack(first)]);

    queue.drop_stream();

    // messages queued during the outage are picked up by the new channel
    let second = queue.push(alert_payload(OPS_EMAIL)).await;
    let settles = queue.wait_settles(2).await;
    assert_eq!(settles[1], Settle::Ack(second));
    assert!(
        harness.connector.connect_count() >= 2,
        "worker should have reconnected"
    );

    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap().unwrap();
}
