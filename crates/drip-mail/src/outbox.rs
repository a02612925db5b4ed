use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{MailTransport, OutgoingEmail, TransportError};

/// File-backed transport.
///
/// Appends every email to `{path}` as one JSON object per line. Parent
/// directories are created on first send.
pub struct OutboxTransport {
  path: PathBuf,
  // Serializes appends so concurrent sends never interleave within a line
  write_lock: Mutex<()>,
}

impl OutboxTransport {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[async_trait]
impl MailTransport for OutboxTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
    let mut line = serde_json::to_vec(email)?;
    line.push(b'\n');

    let _guard = self.write_lock.lock().await;

    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .await?;
    file.write_all(&line).await?;
    file.flush().await?;

    debug!(to = %email.to, path = %self.path.display(), "email written to outbox");
    Ok(())
  }
}
