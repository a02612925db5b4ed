//! Error types for scheduling and sending.

use drip_compiler::GraphError;
use drip_workflow::ValidationError;
use thiserror::Error;

/// Errors raised while loading a workflow document.
#[derive(Debug, Error)]
pub enum SourceError {
  /// No document exists for the workflow id.
  #[error("workflow not found: {0}")]
  NotFound(String),

  /// The workflow id cannot name a document.
  #[error("invalid workflow id: '{0}'")]
  InvalidId(String),

  /// The document exists but is not a valid workflow.
  #[error("failed to parse workflow '{workflow_id}': {source}")]
  Parse {
    workflow_id: String,
    #[source]
    source: serde_json::Error,
  },

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors returned to callers of the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error(transparent)]
  Source(#[from] SourceError),

  /// The workflow is invalid. Nothing was scheduled.
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("recipient is required")]
  MissingRecipient,

  #[error("subject is required")]
  MissingSubject,

  #[error("store error: {0}")]
  Store(#[from] drip_store::Error),
}

impl From<ValidationError> for ScheduleError {
  fn from(err: ValidationError) -> Self {
    ScheduleError::Graph(GraphError::Invalid(err))
  }
}

/// Errors that stop a poll cycle as a whole.
///
/// Per-job failures never surface here; they are recorded on the job.
#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("store error: {0}")]
  Store(#[from] drip_store::Error),
}
