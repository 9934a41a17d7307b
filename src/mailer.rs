//! SMTP delivery of status-report emails.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use crate::StatusReport;
use crate::config::SmtpSettings;

pub type MailResult<T> = Result<T, MailError>;

#[derive(Debug)]
pub enum MailError {
    InvalidAddress(String),
    BuildFailed(String),
    TransportFailed(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::InvalidAddress(msg) => write!(f, "invalid mail address: {}", msg),
            MailError::BuildFailed(msg) => write!(f, "failed to build message: {}", msg),
            MailError::TransportFailed(msg) => write!(f, "smtp transport failed: {}", msg),
        }
    }
}

impl std::error::Error for MailError {}

/// Delivery seam between the consumer loop and the outside world. The
/// worker acks or requeues based on the returned result, so transient
/// transport failures must come back as `Err` rather than being swallowed.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_status_report(&self, to: &str, report: &StatusReport) -> MailResult<()>;
}

/// Render subject and HTML body for one status report.
pub fn render_status_report(report: &StatusReport) -> (String, String) {
    let subject = "Server status report".to_string();

    let (tone, verdict) = if report.down_servers == 0 {
        (
            "✅",
            "<p style=\"color: green;\"><strong>All systems operating normally</strong></p>",
        )
    } else {
        (
            "⚠️",
            "<p style=\"color: red;\"><strong>ATTENTION: some servers are down!</strong></p>",
        )
    };

    let html = format!(
        "<h2>{tone} Server status report</h2>\n\
         <p><strong>Total servers:</strong> {}</p>\n\
         <p><strong>Servers up:</strong> {} ✅</p>\n\
         <p><strong>Servers down:</strong> {} ❌</p>\n\
         <p><strong>Incidents today:</strong> {}</p>\n\
         {verdict}\n\
         <br/>\n\
         <p><em>This is an automated message, please do not reply.</em></p>",
        report.total_servers, report.up_servers, report.down_servers, report.total_incidents_today,
    );

    (subject, html)
}

/// Mailer backed by a `lettre` async SMTP transport.
#[derive(Debug)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build the transport up front so broken settings fail at startup
    /// instead of on the first delivery.
    pub fn new(settings: &SmtpSettings) -> MailResult<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", settings.from)))?;

        let mut builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::TransportFailed(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        builder = builder.port(settings.port);

        if let Some(username) = &settings.username {
            let password = settings.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, report))]
    async fn send_status_report(&self, to: &str, report: &StatusReport) -> MailResult<()> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{to}: {e}")))?;

        let (subject, html) = render_status_report(report);
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| MailError::BuildFailed(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::TransportFailed(e.to_string()))?;
        debug!("status report delivered");
        Ok(())
    }
}
