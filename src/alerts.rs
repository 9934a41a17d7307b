//! Alert construction and fan-out
//!
//! A probe report for a known host becomes one [`AlertEvent`], which fans
//! out to the broker as one rollup message per recipient email. Chat-handle
//! recipients are carried in the event and logged, but message delivery to
//! handles is a separate notification surface and not part of this path.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::broker::AlertPublisher;
use crate::storage::{Host, Recipient};
use crate::{AlertMessage, ProbeReport, StatusReport, protocol_name};

/// Default administrative recipients, used when the directory has nobody to
/// notify. Alerts must never go to nobody.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
pub const DEFAULT_ADMIN_HANDLE: &str = "@admin";

/// Everything known about one alert-worthy probe result.
///
/// Built once per processed report, discarded after publish.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub host_id: u32,
    pub host_address: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub status_code: Option<i32>,
    /// Display name of the reported protocol tag, `UNKNOWN` for tags
    /// outside the known range.
    pub protocol_name: &'static str,
    pub timestamp: DateTime<Utc>,
    pub emails: Vec<String>,
    pub handles: Vec<String>,
}

impl AlertEvent {
    pub fn from_report(report: &ProbeReport, host: &Host, recipients: &[Recipient]) -> Self {
        let (emails, handles) = resolve_recipients(recipients);

        AlertEvent {
            host_id: report.id,
            host_address: host.address.clone(),
            success: report.success,
            error_message: report.error_message.clone(),
            status_code: report.status_code,
            protocol_name: protocol_name(report.protocol),
            timestamp: report.timestamp,
            emails,
            handles,
        }
    }
}

/// Split the directory into emails and handles, dropping blank entries.
/// Only when both lists come out empty does the fixed administrative pair
/// step in.
pub fn resolve_recipients(recipients: &[Recipient]) -> (Vec<String>, Vec<String>) {
    let mut emails: Vec<String> = recipients
        .iter()
        .filter_map(|recipient| recipient.email.clone())
        .filter(|email| !email.trim().is_empty())
        .collect();

    let handles: Vec<String> = recipients
        .iter()
        .filter_map(|recipient| recipient.handle.clone())
        .filter(|handle| !handle.trim().is_empty())
        .collect();

    if emails.is_empty() && handles.is_empty() {
        emails.push(DEFAULT_ADMIN_EMAIL.to_string());
        return (emails, vec![DEFAULT_ADMIN_HANDLE.to_string()]);
    }

    (emails, handles)
}

/// Publish one rollup message per recipient email.
///
/// Failures are logged per message and never propagate upward: alerting is
/// best-effort relative to ingestion.
#[instrument(skip_all, fields(host_id = event.host_id))]
pub async fn publish_alerts(
    event: &AlertEvent,
    report: &StatusReport,
    publisher: &dyn AlertPublisher,
) {
    if !event.handles.is_empty() {
        debug!(
            handles = event.handles.len(),
            "chat-handle recipients noted, delivery is email-only"
        );
    }

    for email in &event.emails {
        let message = AlertMessage {
            email: email.clone(),
            report: report.clone(),
        };

        match publisher.publish(&message).await {
            Ok(()) => debug!(
                %email,
                host = %event.host_address,
                success = event.success,
                protocol = event.protocol_name,
                "alert published"
            ),
            Err(e) => warn!(%email, "failed to publish alert: {e}"),
        }
    }
}
