//! Store trait definitions
//!
//! The ingestion path consumes three narrow collaborator interfaces: the
//! host-configuration store, the probe time-series store, and the recipient
//! directory. They are separate traits so embedders can back each one
//! differently; the bundled SQLite and in-memory backends implement all
//! three on a single struct.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{MonitorEntry, ProbeReport, Protocol, StatusReport};

use super::error::StoreResult;

/// A monitored host as configured by operators.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: u32,

    /// Display name for logs and reports
    pub name: String,

    /// Address the agents probe (hostname or IP)
    pub address: String,

    pub interval_minutes: u32,

    /// Wire protocol tag (1=HTTP, 2=HTTPS, 3=ICMP)
    pub protocol: i32,
}

impl Host {
    /// Entry for this host in the configuration snapshot pushed to agents.
    pub fn monitor_entry(&self) -> MonitorEntry {
        MonitorEntry {
            id: self.id,
            host: self.address.clone(),
            interval_minutes: self.interval_minutes,
            protocol: self.protocol,
        }
    }
}

/// A notification recipient from the user directory.
///
/// Either side may be empty; rows with neither an email nor a messaging
/// handle are useless and filtered out by the directory implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub email: Option<String>,
    pub handle: Option<String>,
}

/// One persisted probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub host_id: u32,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    pub success: bool,
    pub status_code: Option<i32>,
    pub protocol: Protocol,
    pub error_message: Option<String>,
}

impl ProbeRecord {
    /// Convert a decoded wire report into its persisted form.
    ///
    /// Negative response times are clamped to zero and the raw protocol tag
    /// is resolved to a known protocol before anything reaches a store.
    pub fn from_report(report: &ProbeReport) -> Self {
        ProbeRecord {
            host_id: report.id,
            timestamp: report.timestamp,
            response_time_ms: report.clamped_response_time_ms(),
            success: report.success,
            status_code: report.status_code,
            protocol: Protocol::from_wire(report.protocol),
            error_message: report.error_message.clone(),
        }
    }
}

/// Host-configuration store consumed by the ingestion path.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Fetch one host by id. `Ok(None)` means the host is unknown or was
    /// deleted, which the caller treats as "accept but do not alert".
    async fn host(&self, id: u32) -> StoreResult<Option<Host>>;

    /// All configured hosts, used to build configuration snapshots.
    async fn list_hosts(&self) -> StoreResult<Vec<Host>>;
}

/// Probe time-series store.
#[async_trait]
pub trait ProbeStore: Send + Sync {
    async fn insert(&self, record: &ProbeRecord) -> StoreResult<()>;

    /// Daily availability rollup over today's probes (UTC).
    ///
    /// - total: distinct hosts with at least one probe today
    /// - up: hosts whose most recent probe today succeeded
    /// - down: the rest
    /// - incidents: failed probes today
    async fn dashboard_stats(&self) -> StoreResult<StatusReport>;
}

/// User directory listing who gets notified.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_recipients(&self) -> StoreResult<Vec<Recipient>>;
}
