//! Drip Store
//!
//! This crate provides the storage trait and implementations for scheduled
//! email jobs. The store exclusively owns job records: the compiler only
//! creates them, the worker only transitions their state.
//!
//! The [`JobStore`] trait defines operations for:
//! - Creating jobs, singly or as one all-or-nothing batch
//! - Finding due jobs and atomically claiming them for sending
//! - Recording send outcomes and cancellations
//! - Querying jobs for status reporting
//!
//! State transitions are monotonic:
//!
//! ```text
//! Pending ──claim──▶ InFlight ──▶ Sent | Failed
//!    │
//!    ├──────────────────────────▶ Sent | Failed
//!    └──cancel──▶ Cancelled
//! ```
//!
//! Nothing ever leaves `Sent`, `Cancelled` or `Failed`.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::{PoolConfig, SqliteStore};
pub use types::{JobState, NewJob, ScheduledJob};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested job does not exist.
  #[error("job not found: {0}")]
  NotFound(String),

  /// The job exists but is in a state the operation cannot act on.
  #[error("job {job_id} is {state}")]
  InvalidState { job_id: String, state: JobState },

  /// A stored row could not be decoded.
  #[error("invalid job record: {0}")]
  InvalidRecord(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for scheduled jobs.
///
/// Every operation is individually atomic.
#[async_trait]
pub trait JobStore: Send + Sync {
  /// Persist one new job in state `Pending`.
  async fn create(&self, job: NewJob) -> Result<ScheduledJob, Error>;

  /// Persist several jobs at once. Either all are created or none are.
  async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>, Error>;

  /// Get a job by ID.
  async fn get(&self, job_id: &str) -> Result<ScheduledJob, Error>;

  /// Pending jobs with `send_at <= now`, oldest first, ties broken by creation order.
  async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, Error>;

  /// Move a job from `Pending` to `InFlight`, recording `worker_id` as its owner
  /// and `now` as the claim time.
  ///
  /// Returns `false` if the job is no longer pending (claimed elsewhere or cancelled).
  async fn claim(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool, Error>;

  /// Record a successful send. A no-op if the job already reached a terminal state.
  async fn mark_sent(&self, job_id: &str, sent_at: DateTime<Utc>) -> Result<(), Error>;

  /// Record a failed send. A no-op if the job already reached a terminal state.
  async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), Error>;

  /// Cancel a pending job.
  ///
  /// Cancelling an already cancelled job succeeds. Jobs that were sent, failed,
  /// or are being sent return [`Error::InvalidState`].
  async fn cancel(&self, job_id: &str) -> Result<ScheduledJob, Error>;

  /// Cancel every still-pending job of one batch. Returns how many were cancelled.
  async fn cancel_batch(&self, batch_id: &str) -> Result<u64, Error>;

  /// All jobs in the given state, ordered by send time.
  async fn list(&self, state: JobState) -> Result<Vec<ScheduledJob>, Error>;

  /// All jobs of one batch, in creation order.
  async fn list_batch(&self, batch_id: &str) -> Result<Vec<ScheduledJob>, Error>;

  /// Fail `InFlight` jobs claimed before `claimed_before`, left behind by a
  /// worker that stopped mid-send.
  ///
  /// Claims newer than the cutoff may still be in progress on another worker
  /// and are left alone. Recovered jobs are never re-sent automatically, since
  /// their delivery is unknown.
  async fn recover_interrupted(
    &self,
    reason: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<u64, Error>;
}
