//! Registry of live agent connections
//!
//! Every accepted agent socket is registered here for the lifetime of its
//! receive loop. The registry owns the write halves; the per-connection
//! tasks hold non-owning [`AgentHandle`]s for replies. Configuration pushes
//! fan out to every member through [`ConnectionRegistry::broadcast`].
//!
//! ## Locking
//!
//! One mutex guards the member map. Register, unregister and the whole
//! broadcast traversal serialize on it, so membership can never change under
//! a running broadcast. Each member additionally has its own writer mutex
//! shared with the reply path; lock order is always registry before writer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, instrument, trace, warn};

use crate::MonitorEntry;

/// Non-owning reference to one registered agent connection.
///
/// Held by the connection's receive loop to write per-record replies. The
/// writer is shared with the registry's broadcast path behind a mutex.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub id: u64,
    pub peer: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl AgentHandle {
    /// Write one newline-terminated line to this agent.
    pub async fn send_line(&self, line: &str) -> std::io::Result<()> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        self.writer.lock().await.write_all(&payload).await
    }
}

#[derive(Debug)]
struct Member {
    peer: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// Tracks all currently-open agent connections and fans configuration
/// snapshots out to them.
#[derive(Debug)]
pub struct ConnectionRegistry {
    members: Mutex<HashMap<u64, Member>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Add a freshly accepted connection. Never fails; the returned handle
    /// is the caller's reply channel for this connection.
    pub async fn register(&self, peer: SocketAddr, write_half: OwnedWriteHalf) -> AgentHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let writer = Arc::new(Mutex::new(write_half));

        self.members.lock().await.insert(
            id,
            Member {
                peer,
                writer: Arc::clone(&writer),
            },
        );

        debug!(%peer, id, "registered agent connection");
        AgentHandle { id, peer, writer }
    }

    /// Remove a connection and close its write half. Removing an id that is
    /// no longer a member is a no-op.
    pub async fn unregister(&self, id: u64) {
        let removed = self.members.lock().await.remove(&id);

        if let Some(member) = removed {
            let mut writer = member.writer.lock().await;
            let _ = writer.shutdown().await;
            debug!(peer = %member.peer, id, "unregistered agent connection");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Push a configuration snapshot to every registered agent.
    ///
    /// The snapshot is serialized once. Each write runs under the
    /// configured deadline so one unresponsive agent cannot stall the rest;
    /// a write error or an expired deadline marks the member dead, and dead
    /// members are removed before the registry lock is released. Failures
    /// are logged per member, never returned.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn broadcast(&self, entries: &[MonitorEntry]) {
        let payload = match serde_json::to_string(entries) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize configuration snapshot: {e}");
                return;
            }
        };

        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload.as_bytes());
        line.push(b'\n');

        let mut members = self.members.lock().await;
        debug!("pushing configuration to {} agents", members.len());

        let mut dead = Vec::new();
        for (id, member) in members.iter() {
            let write = timeout(self.write_timeout, async {
                member.writer.lock().await.write_all(&line).await
            })
            .await;

            match write {
                Ok(Ok(())) => trace!(peer = %member.peer, "config push delivered"),
                Ok(Err(e)) => {
                    warn!(peer = %member.peer, "config push failed: {e}");
                    dead.push(*id);
                }
                Err(_) => {
                    warn!(
                        peer = %member.peer,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "config push timed out"
                    );
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            if let Some(member) = members.remove(&id) {
                let peer = member.peer;
                let closed = timeout(self.write_timeout, async {
                    let _ = member.writer.lock().await.shutdown().await;
                })
                .await;

                if closed.is_err() {
                    warn!(%peer, "writer busy, close deferred to the connection task");
                }
                debug!(%peer, id, "dropped dead agent connection");
            }
        }
    }
}
