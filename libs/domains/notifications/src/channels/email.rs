//! Email channel. Sending goes through an [`EmailSender`]: SMTP via lettre,
//! or a logging sender for local runs without a mail server.

use super::DeliveryChannel;
use crate::models::{MailInfo, Notification, NotificationType};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use messaging::ProcessingError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SendError {
    /// Connection, timeout or transient SMTP reply
    #[error("SMTP transport error: {0}")]
    Transport(String),

    /// Permanent SMTP reply
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Failed to build message: {0}")]
    Build(String),
}

/// Validated, ready-to-send email
#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub to: Mailbox,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub subject: String,
    pub body: String,
}

impl EmailContent {
    pub fn from_notification(notification: &Notification) -> Result<Self, ProcessingError> {
        let mail_info: &MailInfo = notification.mail_info.as_ref().ok_or_else(|| {
            ProcessingError::validation("mailInfo is required for email notifications")
        })?;

        let to = mail_info.to.trim();
        if to.is_empty() {
            return Err(ProcessingError::validation("recipient email is required"));
        }
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| ProcessingError::validation_with_source("invalid email address format", e))?;

        let cc = parse_all(&mail_info.cc, "invalid CC email address format")?;
        let bcc = parse_all(&mail_info.bcc, "invalid BCC email address format")?;

        Ok(Self {
            to,
            cc,
            bcc,
            subject: notification.subject.clone(),
            body: notification.body.clone(),
        })
    }
}

fn parse_all(addresses: &[String], message: &'static str) -> Result<Vec<Mailbox>, ProcessingError> {
    addresses
        .iter()
        .map(|address| {
            address
                .trim()
                .parse::<Mailbox>()
                .map_err(|e| ProcessingError::validation_with_source(message, e))
        })
        .collect()
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &EmailContent) -> Result<(), SendError>;

    fn name(&self) -> &'static str;
}

pub struct EmailChannel {
    sender: Arc<dyn EmailSender>,
}

impl EmailChannel {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn notification_type(&self) -> NotificationType {
        NotificationType::Email
    }

    fn validate(&self, notification: &Notification) -> Result<(), ProcessingError> {
        EmailContent::from_notification(notification).map(|_| ())
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError> {
        let email = EmailContent::from_notification(notification)?;

        self.sender.send(&email).await.map_err(|e| match e {
            SendError::Transport(_) => ProcessingError::retriable_with_source("email delivery failed", e),
            SendError::Rejected(_) => ProcessingError::processing_with_source("email rejected by server", e),
            SendError::Build(_) => ProcessingError::processing_with_source("failed to build email", e),
        })?;

        info!(
            external_id = %notification.external_id,
            to = %email.to,
            sender = self.sender.name(),
            "Email notification sent"
        );
        Ok(())
    }
}

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_email: String,
    pub from_name: String,
    /// Optional for dev servers like Mailpit
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, from_email: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            from_email: from_email.into(),
            from_name: "Notifications".to_string(),
            username: None,
            password: None,
            use_tls: false,
        }
    }

    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = name.into();
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    config: SmtpConfig,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Result<Self, SendError> {
        let transport = Self::build_transport(&config)?;
        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| SendError::Build(format!("invalid from address: {}", e)))?;

        Ok(Self {
            transport,
            from,
            config,
        })
    }

    fn build_transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SendError::Build(format!("failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn build_message(&self, email: &EmailContent) -> Result<Message, SendError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.clone())
            .subject(&email.subject);

        for cc in &email.cc {
            builder = builder.cc(cc.clone());
        }
        for bcc in &email.bcc {
            builder = builder.bcc(bcc.clone());
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| SendError::Build(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, email: &EmailContent) -> Result<(), SendError> {
        debug!(
            to = %email.to,
            host = %self.config.host,
            port = self.config.port,
            cc_count = email.cc.len(),
            bcc_count = email.bcc.len(),
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;

        self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to, error = %e, "Failed to send email via SMTP");
            if e.is_permanent() {
                SendError::Rejected(e.to_string())
            } else {
                SendError::Transport(e.to_string())
            }
        })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Logs instead of sending. Used when no SMTP host is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingSender;

#[async_trait]
impl EmailSender for LoggingSender {
    async fn send(&self, email: &EmailContent) -> Result<(), SendError> {
        info!(
            to = %email.to,
            cc_count = email.cc.len(),
            bcc_count = email.bcc.len(),
            subject = %email.subject,
            "Email delivery simulated (no SMTP host configured)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
