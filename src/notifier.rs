use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info, warn};

use crate::config::{Config, MailConfig, Recipient};
use crate::diagnostics::DiagnosticLog;
use crate::error::{Error, Result};
use crate::reconcile::ChangeEvent;

/// Sink for change batches and, optionally, fatal-run reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one batch of change events. Not retried by the caller.
    async fn notify(&self, events: &[ChangeEvent]) -> Result<()>;

    /// Deliver the details of a run that aborted.
    async fn report_failure(&self, detail: &str) -> Result<()>;
}

/// Notification body: one line per event, in event order.
pub fn format_changes(events: &[ChangeEvent]) -> String {
    events
        .iter()
        .map(ChangeEvent::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pick the sink for this configuration: SMTP when `[mail]` is present,
/// the log otherwise.
pub fn build_notifier(config: &Config, diagnostics: &DiagnosticLog) -> Result<Box<dyn Notifier>> {
    match &config.mail {
        Some(mail) => Ok(Box::new(SmtpNotifier::new(
            mail,
            config.recipients(),
            diagnostics.clone(),
        )?)),
        None => {
            info!("No [mail] section configured, changes will only be logged");
            Ok(Box::new(LogNotifier))
        }
    }
}

/// Writes notifications to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, events: &[ChangeEvent]) -> Result<()> {
        info!("{} feed(s) updated", events.len());
        for event in events {
            info!("{}", event.summary_line());
        }
        Ok(())
    }

    async fn report_failure(&self, detail: &str) -> Result<()> {
        error!("Run failed: {}", detail);
        Ok(())
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
    subject: String,
    error_subject: String,
    diagnostics: DiagnosticLog,
}

fn mailbox(recipient: &Recipient) -> Result<Mailbox> {
    let address: Address = recipient.email.parse().map_err(|e| {
        Error::config(format!("invalid email address '{}': {}", recipient.email, e))
    })?;
    Ok(Mailbox::new(Some(recipient.name.clone()), address))
}

impl SmtpNotifier {
    pub fn new(
        mail: &MailConfig,
        recipients: &[Recipient],
        diagnostics: DiagnosticLog,
    ) -> Result<Self> {
        let sender = mailbox(&mail.sender)?;
        let recipients = recipients
            .iter()
            .map(mailbox)
            .collect::<Result<Vec<_>>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&mail.host)
            .map_err(|e| Error::config(format!("invalid SMTP host '{}': {}", mail.host, e)))?
            .port(mail.port)
            .credentials(Credentials::new(
                mail.username.clone(),
                mail.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            sender,
            recipients,
            subject: mail.subject.clone(),
            error_subject: mail.error_subject.clone(),
            diagnostics,
        })
    }

    /// Send one message per recipient. A failed recipient is logged and
    /// does not stop delivery to the rest.
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mut failed = Vec::new();

        for recipient in &self.recipients {
            if let Err(e) = self.send_to(recipient, subject, body).await {
                warn!("Failed to send mail to {}: {}", recipient, e);
                self.diagnostics
                    .record(&format!("mail to {}", recipient), &e)
                    .await;
                failed.push(recipient.to_string());
            }
        }

        if failed.is_empty() {
            info!(
                "Sent '{}' to {} recipient(s)",
                subject,
                self.recipients.len()
            );
            Ok(())
        } else {
            Err(Error::notify(format!(
                "delivery failed for {} of {} recipient(s): {}",
                failed.len(),
                self.recipients.len(),
                failed.join(", ")
            )))
        }
    }

    async fn send_to(&self, recipient: &Mailbox, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::notify(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::notify(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, events: &[ChangeEvent]) -> Result<()> {
        self.send(&self.subject, &format_changes(events)).await
    }

    async fn report_failure(&self, detail: &str) -> Result<()> {
        self.send(&self.error_subject, detail).await
    }
}
