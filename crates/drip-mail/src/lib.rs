//! Drip Mail
//!
//! The [`MailTransport`] trait is the boundary between the job worker and
//! whatever actually delivers email. A transport either accepts a message or
//! returns a [`TransportError`]; it never retries on its own.
//!
//! Two transports ship with the crate:
//! - [`LogTransport`] writes each email to the log and always succeeds
//! - [`OutboxTransport`] appends each email as a JSON line to a file

mod log;
mod outbox;

pub use log::LogTransport;
pub use outbox::OutboxTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sender address used when none is configured.
pub const DEFAULT_FROM: &str = "noreply@localhost";

/// A fully rendered email, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
  pub from: String,
  pub to: String,
  pub subject: String,
  pub body: String,
}

/// Error returned when a transport could not deliver an email.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The transport refused the message.
  #[error("message rejected: {reason}")]
  Rejected { reason: String },

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The message could not be encoded.
  #[error("serialization error: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Delivers outgoing email.
#[async_trait]
pub trait MailTransport: Send + Sync {
  /// Send one email. Returning `Ok` means the transport accepted it.
  async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}
