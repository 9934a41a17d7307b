//! Shared fixtures for the integration tests

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pulsewatch::broker::{
    AlertPublisher, BrokerChannel, BrokerConnector, BrokerError, BrokerResult, Delivery,
};
use pulsewatch::config::RetrySettings;
use pulsewatch::ingest::IngestServer;
use pulsewatch::mailer::{MailError, MailResult, Mailer};
use pulsewatch::notify::NotificationWorker;
use pulsewatch::registry::ConnectionRegistry;
use pulsewatch::storage::memory::MemoryStore;
use pulsewatch::storage::{Host, Recipient};
use pulsewatch::{AlertMessage, StatusReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, watch};

pub const OPS_EMAIL: &str = "ops@example.com";

/// Store pre-seeded with one monitored host (id 1) and one recipient.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .add_host(Host {
            id: 1,
            name: "web-1".to_string(),
            address: "web-1.example.com".to_string(),
            interval_minutes: 5,
            protocol: 2,
        })
        .await;
    store
        .add_recipient(Recipient {
            email: Some(OPS_EMAIL.to_string()),
            handle: None,
        })
        .await;
    store
}

/// A wire line for a probe of the given host. Carries a current timestamp
/// so the report counts toward today's rollup.
pub fn probe_line(id: u32, success: bool) -> String {
    let now = chrono::Utc::now().to_rfc3339();
    format!(
        r#"{{"id":{id},"timestamp":"{now}","responseTimeMs":23.5,"success":{success},"statusCode":503,"protocol":2,"errorMessage":"service unavailable"}}"#
    )
}

pub fn alert_payload(email: &str) -> Vec<u8> {
    serde_json::to_vec(&AlertMessage {
        email: email.to_string(),
        report: StatusReport {
            total_servers: 4,
            up_servers: 3,
            down_servers: 1,
            total_incidents_today: 2,
        },
    })
    .unwrap()
}

/// Publisher capturing every message, for ingest-side assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<AlertMessage>>,
}

#[async_trait]
impl AlertPublisher for RecordingPublisher {
    async fn publish(&self, message: &AlertMessage) -> BrokerResult<()> {
        self.published.lock().await.push(message.clone());
        Ok(())
    }
}

pub struct IngestHarness {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: watch::Sender<bool>,
}

/// Run an ingest server on a random local port, backed by the given store
/// for hosts, probes and recipients alike.
pub async fn spawn_ingest(
    store: Arc<MemoryStore>,
    publisher: Arc<dyn AlertPublisher>,
) -> IngestHarness {
    let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(500)));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let server = IngestServer::new(
        registry.clone(),
        store.clone(),
        store.clone(),
        store,
        publisher,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.run(listener, shutdown_rx).await });

    IngestHarness {
        addr,
        registry,
        shutdown,
    }
}

pub type ReplyLines = tokio::io::Lines<BufReader<OwnedReadHalf>>;

pub async fn connect_agent(addr: SocketAddr) -> (ReplyLines, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    (BufReader::new(read_half).lines(), write_half)
}

pub async fn send_line(tx: &mut OwnedWriteHalf, line: &str) {
    tx.write_all(line.as_bytes()).await.unwrap();
    tx.write_all(b"\n").await.unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settle {
    Ack(u64),
    Reject { tag: u64, requeue: bool },
}

/// In-process stand-in for the broker queue. Tests push payloads, worker
/// channels drain them. Payloads survive a dropped channel the way they
/// would in a durable queue.
#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<Delivery>>,
    wakeup: Notify,
    next_tag: AtomicU64,
    end_stream: AtomicU32,
    settles: Mutex<Vec<Settle>>,
}

impl FakeQueue {
    /// Enqueue a payload, returning the delivery tag it will carry.
    pub async fn push(&self, payload: Vec<u8>) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending
            .lock()
            .await
            .push_back(Delivery { tag, payload });
        self.wakeup.notify_one();
        tag
    }

    /// Make the active channel report an ended stream, forcing a reconnect.
    pub fn drop_stream(&self) {
        self.end_stream.fetch_add(1, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// Wait until at least `n` settlements happened, returning all of them.
    pub async fn wait_settles(&self, n: usize) -> Vec<Settle> {
        for _ in 0..200 {
            if self.settles.lock().await.len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.settles.lock().await.clone()
    }
}

pub struct QueueChannel {
    queue: Arc<FakeQueue>,
}

#[async_trait]
impl BrokerChannel for QueueChannel {
    async fn next_delivery(&mut self) -> BrokerResult<Option<Delivery>> {
        loop {
            let ended = self
                .queue
                .end_stream
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if ended {
                return Ok(None);
            }
            if let Some(delivery) = self.queue.pending.lock().await.pop_front() {
                return Ok(Some(delivery));
            }
            self.queue.wakeup.notified().await;
        }
    }

    async fn ack(&mut self, tag: u64) -> BrokerResult<()> {
        self.queue.settles.lock().await.push(Settle::Ack(tag));
        Ok(())
    }

    async fn reject(&mut self, tag: u64, requeue: bool) -> BrokerResult<()> {
        self.queue
            .settles
            .lock()
            .await
            .push(Settle::Reject { tag, requeue });
        Ok(())
    }

    async fn close(&mut self) {}
}

pub struct QueueConnector {
    queue: Arc<FakeQueue>,
    connects: AtomicU32,
}

impl QueueConnector {
    pub fn new(queue: Arc<FakeQueue>) -> Arc<Self> {
        Arc::new(Self {
            queue,
            connects: AtomicU32::new(0),
        })
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for QueueConnector {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(QueueChannel {
            queue: self.queue.clone(),
        }))
    }
}

/// Publisher feeding the fake queue, wiring the ingest side to the worker.
pub struct QueuePublisher {
    queue: Arc<FakeQueue>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<FakeQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl AlertPublisher for QueuePublisher {
    async fn publish(&self, message: &AlertMessage) -> BrokerResult<()> {
        let payload =
            serde_json::to_vec(message).map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
        self.queue.push(payload).await;
        Ok(())
    }
}

/// Mailer capturing deliveries, optionally failing the first few sends.
#[derive(Default)]
pub struct RecordingMailer {
    pub fail_next: AtomicU32,
    pub sent: Mutex<Vec<(String, StatusReport)>>,
}

impl RecordingMailer {
    /// Wait until at least `n` mails went out, returning all of them.
    pub async fn wait_sent(&self, n: usize) -> Vec<(String, StatusReport)> {
        for _ in 0..200 {
            if self.sent.lock().await.len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_status_report(&self, to: &str, report: &StatusReport) -> MailResult<()> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(MailError::TransportFailed("scripted smtp outage".to_string()));
        }
        self.sent
            .lock()
            .await
            .push((to.to_string(), report.clone()));
        Ok(())
    }
}

pub struct WorkerHarness {
    pub connector: Arc<QueueConnector>,
    pub shutdown: watch::Sender<bool>,
    pub task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Run a notification worker against the fake queue with fast retries.
pub fn spawn_worker(queue: Arc<FakeQueue>, mailer: Arc<RecordingMailer>) -> WorkerHarness {
    let connector = QueueConnector::new(queue);
    let retry = RetrySettings {
        max_attempts: 5,
        base_delay_ms: 1,
        max_delay_ms: 10,
    };
    let worker = Arc::new(NotificationWorker::new(connector.clone(), mailer, &retry));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    WorkerHarness {
        connector,
        shutdown,
        task,
    }
}
