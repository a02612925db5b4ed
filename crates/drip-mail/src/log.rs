use async_trait::async_trait;
use tracing::info;

use crate::{MailTransport, OutgoingEmail, TransportError};

/// Development transport that only logs.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

impl LogTransport {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl MailTransport for LogTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
    info!(
      from = %email.from,
      to = %email.to,
      subject = %email.subject,
      body_len = email.body.len(),
      "email sent"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_log_transport_accepts_everything() {
    let email = OutgoingEmail {
      from: "a@example.com".to_string(),
      to: "b@example.com".to_string(),
      subject: String::new(),
      body: String::new(),
    };

    assert!(LogTransport::new().send(&email).await.is_ok());
  }
}
