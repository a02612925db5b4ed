use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Error;

/// Lifecycle state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobState {
  Pending,
  /// Claimed by a worker; the send is in progress.
  InFlight,
  Sent,
  Cancelled,
  Failed,
}

impl JobState {
  /// Terminal states are never left.
  pub fn is_terminal(self) -> bool {
    matches!(self, JobState::Sent | JobState::Cancelled | JobState::Failed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      JobState::Pending => "pending",
      JobState::InFlight => "in_flight",
      JobState::Sent => "sent",
      JobState::Cancelled => "cancelled",
      JobState::Failed => "failed",
    }
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(JobState::Pending),
      "in_flight" => Ok(JobState::InFlight),
      "sent" => Ok(JobState::Sent),
      "cancelled" => Ok(JobState::Cancelled),
      "failed" => Ok(JobState::Failed),
      other => Err(format!("unknown job state: {}", other)),
    }
  }
}

/// A job to be created. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
  /// Groups the jobs created by one trigger.
  pub batch_id: String,
  /// The workflow and email node that produced the job; `None` for one-off emails.
  pub workflow_id: Option<String>,
  pub node_id: Option<String>,
  pub recipient: String,
  pub subject: String,
  pub body: String,
  pub send_at: DateTime<Utc>,
}

/// A scheduled job as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
  pub job_id: String,
  /// Creation sequence number; breaks ties between equal send times.
  pub seq: i64,
  pub batch_id: String,
  pub workflow_id: Option<String>,
  pub node_id: Option<String>,
  pub recipient: String,
  pub subject: String,
  pub body: String,
  pub send_at: DateTime<Utc>,
  pub state: JobState,
  pub created_at: DateTime<Utc>,
  /// Worker that moved the job to `InFlight`, and when.
  pub claimed_by: Option<String>,
  pub claimed_at: Option<DateTime<Utc>>,
  pub sent_at: Option<DateTime<Utc>>,
  /// Failure reason, set on transition to `Failed`.
  pub error: Option<String>,
}

/// A `scheduled_jobs` row. Timestamps are epoch milliseconds.
#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
  pub seq: i64,
  pub job_id: String,
  pub batch_id: String,
  pub workflow_id: Option<String>,
  pub node_id: Option<String>,
  pub recipient: String,
  pub subject: String,
  pub body: String,
  pub send_at: i64,
  pub state: JobState,
  pub created_at: i64,
  pub claimed_by: Option<String>,
  pub claimed_at: Option<i64>,
  pub sent_at: Option<i64>,
  pub error: Option<String>,
}

impl TryFrom<JobRow> for ScheduledJob {
  type Error = Error;

  fn try_from(row: JobRow) -> Result<Self, Self::Error> {
    let millis = |column: &str, value: i64| {
      DateTime::from_timestamp_millis(value).ok_or_else(|| {
        Error::InvalidRecord(format!(
          "{}: {} out of range for job {}",
          column, value, row.job_id
        ))
      })
    };

    let send_at = millis("send_at", row.send_at)?;
    let created_at = millis("created_at", row.created_at)?;
    let claimed_at = row.claimed_at.map(|v| millis("claimed_at", v)).transpose()?;
    let sent_at = row.sent_at.map(|v| millis("sent_at", v)).transpose()?;

    Ok(ScheduledJob {
      job_id: row.job_id,
      seq: row.seq,
      batch_id: row.batch_id,
      workflow_id: row.workflow_id,
      node_id: row.node_id,
      recipient: row.recipient,
      subject: row.subject,
      body: row.body,
      send_at,
      state: row.state,
      created_at,
      claimed_by: row.claimed_by,
      claimed_at,
      sent_at,
      error: row.error,
    })
  }
}

/// Timestamps are persisted with millisecond precision.
pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
