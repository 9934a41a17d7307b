//! TCP ingestion listener
//!
//! Terminates the line-oriented agent protocol: one JSON probe report per
//! line in, one `OK` or `ERROR: <reason>` line out. Each accepted
//! connection runs in its own task and moves through
//!
//! ```text
//! Accepted → Registered → Receiving → (Closed | Errored)
//! ```
//!
//! Error isolation is per record: a malformed line or a failed insert gets
//! an error reply and the loop continues. Only transport failures (EOF,
//! read error, reply write error) end a connection. Everything after a
//! successful insert is the alert path and is best-effort; its failures are
//! logged and never surface to the agent.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::ProbeReport;
use crate::alerts::{AlertEvent, publish_alerts};
use crate::broker::AlertPublisher;
use crate::registry::{AgentHandle, ConnectionRegistry};
use crate::storage::{HostStore, ProbeRecord, ProbeStore, RecipientDirectory};
use crate::util::from_json_case_insensitive;

/// Long-lived server driving persistence and alerting for every agent.
#[derive(Clone)]
pub struct IngestServer {
    registry: Arc<ConnectionRegistry>,
    hosts: Arc<dyn HostStore>,
    probes: Arc<dyn ProbeStore>,
    recipients: Arc<dyn RecipientDirectory>,
    publisher: Arc<dyn AlertPublisher>,
}

impl IngestServer {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        hosts: Arc<dyn HostStore>,
        probes: Arc<dyn ProbeStore>,
        recipients: Arc<dyn RecipientDirectory>,
        publisher: Arc<dyn AlertPublisher>,
    ) -> Self {
        Self {
            registry,
            hosts,
            probes,
            recipients,
            publisher,
        }
    }

    /// Accept loop. Spawns one task per agent connection and returns once
    /// the shutdown signal flips.
    #[instrument(skip_all)]
    pub async fn run(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("listening for agents on {addr}"),
            Err(e) => warn!("listening on unknown address: {e}"),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "agent connected");
                            let server = self.clone();
                            let conn_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer, conn_shutdown).await;
                            });
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received, closing listener");
                    break;
                }
            }
        }
    }

    #[instrument(skip(self, stream, shutdown), fields(peer = %peer))]
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (read_half, write_half) = stream.into_split();
        let agent = self.registry.register(peer, write_half).await;
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if let Err(e) = self.process_line(&line, &agent).await {
                                warn!("reply failed, dropping connection: {e}");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("agent disconnected");
                            break;
                        }
                        Err(e) => {
                            warn!("read failed: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("closing connection for shutdown");
                    break;
                }
            }
        }

        self.registry.unregister(agent.id).await;
    }

    /// Handle one wire line and write the reply. `Err` means the reply
    /// itself could not be written, which is terminal for the connection.
    async fn process_line(&self, line: &str, agent: &AgentHandle) -> std::io::Result<()> {
        let report: ProbeReport = match from_json_case_insensitive(line) {
            Ok(report) => report,
            Err(e) => {
                warn!(peer = %agent.peer, "undecodable probe report: {e}");
                return agent.send_line("ERROR: invalid probe report format").await;
            }
        };

        let record = ProbeRecord::from_report(&report);
        if let Err(e) = self.probes.insert(&record).await {
            error!(host_id = report.id, "failed to persist probe report: {e}");
            return agent.send_line(&format!("ERROR: {e}")).await;
        }
        trace!(host_id = report.id, "probe report persisted");

        self.maybe_alert(&report).await;

        agent.send_line("OK").await
    }

    /// Alert path for an already-persisted report. Best-effort throughout.
    async fn maybe_alert(&self, report: &ProbeReport) {
        let host = match self.hosts.host(report.id).await {
            Ok(Some(host)) => host,
            Ok(None) => {
                warn!(
                    host_id = report.id,
                    "report for unknown host accepted without alerting"
                );
                return;
            }
            Err(e) => {
                error!(host_id = report.id, "host lookup failed, alert skipped: {e}");
                return;
            }
        };

        let recipients = match self.recipients.list_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(
                    host_id = report.id,
                    "recipient lookup failed, alert skipped: {e}"
                );
                return;
            }
        };

        let event = AlertEvent::from_report(report, &host, &recipients);

        let rollup = match self.probes.dashboard_stats().await {
            Ok(rollup) => rollup,
            Err(e) => {
                error!(host_id = report.id, "status rollup failed, alert skipped: {e}");
                return;
            }
        };

        publish_alerts(&event, &rollup, self.publisher.as_ref()).await;
    }
}
