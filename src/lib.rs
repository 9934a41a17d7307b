pub mod alerts;
pub mod broker;
pub mod config;
pub mod ingest;
pub mod mailer;
pub mod notify;
pub mod registry;
pub mod storage;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe protocol spoken by an agent against a monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Https,
    Icmp,
}

impl Protocol {
    /// Resolve a wire tag to a protocol. Unknown tags fall back to ICMP,
    /// the most conservative probe.
    pub fn from_wire(tag: i32) -> Self {
        match tag {
            1 => Protocol::Http,
            2 => Protocol::Https,
            _ => Protocol::Icmp,
        }
    }

    pub const fn wire_tag(self) -> i32 {
        match self {
            Protocol::Http => 1,
            Protocol::Https => 2,
            Protocol::Icmp => 3,
        }
    }
}

/// Display name for a raw protocol tag as carried in alert events.
///
/// Unlike [`Protocol::from_wire`], this does not guess: a tag outside the
/// known range is reported as `UNKNOWN` so misbehaving agents stay visible.
pub fn protocol_name(tag: i32) -> &'static str {
    match tag {
        1 => "HTTP",
        2 => "HTTPS",
        3 => "ICMP",
        _ => "UNKNOWN",
    }
}

/// One probe result reported by an agent, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Identifier of the monitored host this probe targeted.
    pub id: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename(serialize = "responseTimeMs", deserialize = "responsetimems"))]
    pub response_time_ms: f64,
    pub success: bool,
    #[serde(default, rename(serialize = "statusCode", deserialize = "statuscode"))]
    pub status_code: Option<i32>,
    /// Raw protocol tag. Absent on the wire means 0, which resolves to ICMP.
    #[serde(default)]
    pub protocol: i32,
    #[serde(default, rename(serialize = "errorMessage", deserialize = "errormessage"))]
    pub error_message: Option<String>,
}

impl ProbeReport {
    /// Response time as persisted. Agents occasionally report negative
    /// values on clock skew; those are clamped to zero.
    pub fn clamped_response_time_ms(&self) -> f64 {
        self.response_time_ms.max(0.0)
    }
}

/// One entry of the monitoring configuration pushed to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub id: u32,
    pub host: String,
    #[serde(rename(serialize = "intervalMinutes", deserialize = "intervalminutes"))]
    pub interval_minutes: u32,
    pub protocol: i32,
}

/// Daily availability rollup carried inside every alert message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename(serialize = "totalServers", deserialize = "totalservers"))]
    pub total_servers: u32,
    #[serde(rename(serialize = "upServers", deserialize = "upservers"))]
    pub up_servers: u32,
    #[serde(rename(serialize = "downServers", deserialize = "downservers"))]
    pub down_servers: u32,
    #[serde(rename(serialize = "totalIncidentsToday", deserialize = "totalincidentstoday"))]
    pub total_incidents_today: u32,
}

/// Wire record published to the broker, one per notified recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub email: String,
    pub report: StatusReport,
}
