//! Outbound mail transports.
//!
//! [`SmtpMailer`] relays through SMTP via lettre, [`LogMailer`] only logs,
//! and [`MemoryOutbox`] records messages for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::header::{HeaderName, HeaderValue};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::MailError;

/// A fully rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

/// Something that can deliver an [`OutgoingEmail`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Build a lettre message, validating addresses and extra headers.
pub fn build_message(email: &OutgoingEmail) -> Result<Message, MailError> {
    let from = email.from.parse().map_err(|e| MailError::InvalidAddress {
        address: email.from.clone(),
        reason: format!("{e}"),
    })?;

    let mut builder = Message::builder().from(from).subject(email.subject.as_str());

    for to in &email.to {
        builder = builder.to(to.parse().map_err(|e| MailError::InvalidAddress {
            address: to.clone(),
            reason: format!("{e}"),
        })?);
    }

    for (name, value) in &email.headers {
        let header_name =
            HeaderName::new_from_ascii(name.clone()).map_err(|e| MailError::InvalidHeader {
                name: name.clone(),
                reason: format!("{e}"),
            })?;
        builder = builder.raw_header(HeaderValue::new(header_name, value.clone()));
    }

    builder
        .body(email.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Delivers through an SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(format!("SMTP task failed: {e}")))?
            .map_err(|e| MailError::Transport(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = ?email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

// ── Log ─────────────────────────────────────────────────────────────

/// Logs outgoing mail instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        build_message(email)?;
        tracing::info!(
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            headers = ?email.headers,
            body = %email.body,
            "Email not sent (log backend)"
        );
        Ok(())
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Records every message it is asked to send.
#[derive(Clone, Default)]
pub struct MemoryOutbox {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn messages(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl Mailer for MemoryOutbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        build_message(email)?;
        self.sent
            .lock()
            .map_err(|_| MailError::Transport("outbox lock poisoned".into()))?
            .push(email.clone());
        Ok(())
    }
}
