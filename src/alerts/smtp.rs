//! SMTP mail transport backed by lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use super::{MailError, MailTransport, OutgoingMail};
use crate::config::SmtpConfig;

/// Production mail transport; one instance is shared by the alert engine.
pub struct SmtpMailer {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a transport from the SMTP section of the config.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(format!("smtp relay error: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let builder = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            from_address: config.from_address.clone(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let from: Mailbox = self
            .from_address
            .parse()
            .map_err(|e| MailError::Message(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(&mail.subject);
        for to in &mail.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| MailError::Message(format!("invalid recipient {to}: {e}")))?;
            builder = builder.to(mailbox);
        }
        for cc in &mail.cc {
            let mailbox: Mailbox = cc
                .parse()
                .map_err(|e| MailError::Message(format!("invalid cc {cc}: {e}")))?;
            builder = builder.cc(mailbox);
        }

        let message = builder
            .body(mail.body.clone())
            .map_err(|e| MailError::Message(format!("failed to build email: {e}")))?;

        debug!(subject = %mail.subject, recipients = mail.to.len(), "sending alert mail");
        self.transport.send(message).await.map_err(|e| {
            error!(error = %e, "smtp send failed");
            MailError::Transport(e.to_string())
        })?;

        info!(subject = %mail.subject, "alert mail sent");
        Ok(())
    }
}
