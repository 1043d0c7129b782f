//! Outbound delivery channels.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, instrument};

use khata_infra::SmtpConfig;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("message has no recipients")]
    NoRecipients,

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    /// Plain-text alternative.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSms {
    pub to: Vec<String>,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, sms: OutgoingSms) -> Result<(), ChannelError>;
}

#[async_trait]
impl<T: Mailer + ?Sized> Mailer for Arc<T> {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        (**self).send(email).await
    }
}

#[async_trait]
impl<T: SmsSender + ?Sized> SmsSender for Arc<T> {
    async fn send(&self, sms: OutgoingSms) -> Result<(), ChannelError> {
        (**self).send(sms).await
    }
}

/// Logs every email instead of sending it, and keeps a copy.
#[derive(Debug, Default)]
pub struct LogMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        if email.to.is_empty() {
            return Err(ChannelError::NoRecipients);
        }
        info!(to = ?email.to, subject = %email.subject, "email (log only)");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email);
        }
        Ok(())
    }
}

/// Logs every SMS instead of sending it, and keeps a copy.
#[derive(Debug, Default)]
pub struct LogSmsSender {
    sent: Mutex<Vec<OutgoingSms>>,
}

impl LogSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingSms> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, sms: OutgoingSms) -> Result<(), ChannelError> {
        if sms.to.is_empty() {
            return Err(ChannelError::NoRecipients);
        }
        info!(to = ?sms.to, body = %sms.body, "sms (log only)");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(sms);
        }
        Ok(())
    }
}

/// SMTP relay delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ChannelError> {
        let from = parse_mailbox(&config.from)?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| ChannelError::Transport(e.to_string()))?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Unencrypted transport for local catchers (Mailpit, MailHog).
    pub fn local(host: &str, port: u16, from: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            transport: AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(port)
                .build(),
            from: parse_mailbox(from)?,
        })
    }

    fn build(&self, email: OutgoingEmail) -> Result<Message, ChannelError> {
        if email.to.is_empty() {
            return Err(ChannelError::NoRecipients);
        }
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject);
        for to in &email.to {
            builder = builder.to(parse_mailbox(to)?);
        }
        for cc in &email.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(parse_mailbox(bcc)?);
        }

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(email.html);
        let message = match email.text {
            Some(text) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(html),
            ),
            None => builder.singlepart(html),
        };
        message.map_err(|e| ChannelError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, email), fields(to = ?email.to), err)]
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        let message = self.build(email)?;
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ChannelError> {
    address.parse().map_err(|e: lettre::address::AddressError| ChannelError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}
