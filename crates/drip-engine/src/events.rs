//! Job events and notifiers for observability.
//!
//! The scheduler and worker emit events as jobs move through their states so
//! consumers can count sends, surface transport failures, stream progress, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while scheduling and sending jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
  /// Jobs were persisted: a compiled workflow, or one email (`workflow_id` is `None`).
  Scheduled {
    batch_id: String,
    workflow_id: Option<String>,
    jobs_created: usize,
  },

  /// A job's email was accepted by the transport.
  Sent { job_id: String, recipient: String },

  /// The transport rejected a job's email. The job will not be retried.
  Failed { job_id: String, error: String },

  /// A due job was no longer pending when the worker tried to claim it.
  Skipped { job_id: String },

  /// A job was cancelled before it was sent.
  Cancelled { job_id: String },
}

/// Trait for receiving job events.
///
/// Implementations decide what to do with them (persist, broadcast, log, ignore).
pub trait JobNotifier: Send + Sync {
  fn notify(&self, event: JobEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl JobNotifier for NoopNotifier {
  fn notify(&self, _event: JobEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a send; at most a few events per job
  sender: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<JobEvent>) -> Self {
    Self { sender }
  }
}

impl JobNotifier for ChannelNotifier {
  fn notify(&self, event: JobEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
