//! In-memory store (no persistence)
//!
//! Backs the `storage = "none"` collector mode and doubles as the store
//! fixture in tests. Same observable semantics as the SQLite store, all
//! data lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::StatusReport;

use super::backend::{Host, HostStore, ProbeRecord, ProbeStore, Recipient, RecipientDirectory};
use super::error::StoreResult;
use super::utc_today_window;

/// Mutex-guarded in-memory host store, probe store, and recipient directory.
#[derive(Default)]
pub struct MemoryStore {
    hosts: Mutex<HashMap<u32, Host>>,
    recipients: Mutex<Vec<Recipient>>,
    probes: Mutex<Vec<ProbeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_host(&self, host: Host) {
        self.hosts.lock().await.insert(host.id, host);
    }

    pub async fn add_recipient(&self, recipient: Recipient) {
        self.recipients.lock().await.push(recipient);
    }

    /// Snapshot of everything persisted so far, oldest first.
    pub async fn probes(&self) -> Vec<ProbeRecord> {
        self.probes.lock().await.clone()
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn host(&self, id: u32) -> StoreResult<Option<Host>> {
        Ok(self.hosts.lock().await.get(&id).cloned())
    }

    async fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        let mut hosts: Vec<Host> = self.hosts.lock().await.values().cloned().collect();
        hosts.sort_by_key(|host| host.id);
        Ok(hosts)
    }
}

#[async_trait]
impl ProbeStore for MemoryStore {
    async fn insert(&self, record: &ProbeRecord) -> StoreResult<()> {
        debug!(host_id = record.host_id, "persisting probe report in memory");
        self.probes.lock().await.push(record.clone());
        Ok(())
    }

    async fn dashboard_stats(&self) -> StoreResult<StatusReport> {
        let (start, end) = utc_today_window();
        let probes = self.probes.lock().await;

        let mut latest: HashMap<u32, (DateTime<Utc>, bool)> = HashMap::new();
        let mut incidents = 0u32;

        for record in probes
            .iter()
            .filter(|record| record.timestamp >= start && record.timestamp < end)
        {
            if !record.success {
                incidents += 1;
            }

            let entry = latest
                .entry(record.host_id)
                .or_insert((record.timestamp, record.success));
            if record.timestamp >= entry.0 {
                *entry = (record.timestamp, record.success);
            }
        }

        let total = latest.len() as u32;
        let up = latest.values().filter(|(_, success)| *success).count() as u32;

        Ok(StatusReport {
            total_servers: total,
            up_servers: up,
            down_servers: total - up,
            total_incidents_today: incidents,
        })
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn list_recipients(&self) -> StoreResult<Vec<Recipient>> {
        let recipients = self
            .recipients
            .lock()
            .await
            .iter()
            .filter(|recipient| recipient.email.is_some() || recipient.handle.is_some())
            .cloned()
            .collect();

        Ok(recipients)
    }
}
