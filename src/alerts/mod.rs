//! Email alert engine: threshold matching, template rendering, and dispatch
//! through an injected mail transport.

mod engine;
mod smtp;
mod template;

pub use engine::send_alerts_for_value;
pub use smtp::SmtpMailer;
pub use template::{render_template, TemplateError};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("message build error: {0}")]
    Message(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A rendered alert mail ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Transport seam. Production wires [`SmtpMailer`]; tests inject a recorder.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}
