//! Scheduling facade used by the request-serving side.
//!
//! Compilation and job creation happen here, synchronously per request. The
//! [`JobWorker`](crate::JobWorker) is the only other writer to the store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_config::WorkflowDef;
use drip_store::{JobState, JobStore, NewJob, ScheduledJob};
use drip_workflow::Workflow;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScheduleError;
use crate::events::{JobEvent, JobNotifier, NoopNotifier};
use crate::source::WorkflowSource;

/// Result of scheduling one workflow for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReceipt {
  /// Identifies every job created by this call; see [`Scheduler::cancel_batch`].
  pub batch_id: String,
  pub workflow_id: String,
  pub jobs_created: usize,
  pub job_ids: Vec<String>,
}

/// Compiles workflows into jobs and exposes job management to callers.
pub struct Scheduler<S, W> {
  store: Arc<S>,
  source: W,
  notifier: Arc<dyn JobNotifier>,
}

impl<S: JobStore, W: WorkflowSource> Scheduler<S, W> {
  pub fn new(store: Arc<S>, source: W) -> Self {
    Self {
      store,
      source,
      notifier: Arc::new(NoopNotifier),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Load a workflow and schedule its emails for `recipient`, timed from `start`.
  ///
  /// Either every job of the workflow is created or none is.
  pub async fn schedule_workflow(
    &self,
    workflow_id: &str,
    recipient: &str,
    start: DateTime<Utc>,
  ) -> Result<ScheduleReceipt, ScheduleError> {
    check_recipient(recipient)?;
    let def = self.source.load(workflow_id).await?;
    self.schedule_definition(def, recipient, start).await
  }

  /// Schedule an already loaded workflow document.
  pub async fn schedule_definition(
    &self,
    def: WorkflowDef,
    recipient: &str,
    start: DateTime<Utc>,
  ) -> Result<ScheduleReceipt, ScheduleError> {
    let recipient = check_recipient(recipient)?;
    let workflow = Workflow::from_def(def)?;
    let drafts = drip_compiler::compile(&workflow, recipient, start)?;

    let batch_id = uuid::Uuid::new_v4().to_string();
    let jobs: Vec<NewJob> = drafts
      .into_iter()
      .map(|draft| NewJob {
        batch_id: batch_id.clone(),
        workflow_id: Some(workflow.workflow_id.clone()),
        node_id: Some(draft.node_id),
        recipient: draft.recipient,
        subject: draft.subject,
        body: draft.body,
        send_at: draft.send_at,
      })
      .collect();

    let created = self.store.create_batch(jobs).await?;

    info!(
      workflow_id = %workflow.workflow_id,
      batch_id = %batch_id,
      recipient,
      jobs_created = created.len(),
      "workflow scheduled"
    );

    self.notifier.notify(JobEvent::Scheduled {
      batch_id: batch_id.clone(),
      workflow_id: Some(workflow.workflow_id.clone()),
      jobs_created: created.len(),
    });

    Ok(ScheduleReceipt {
      batch_id,
      workflow_id: workflow.workflow_id,
      jobs_created: created.len(),
      job_ids: created.into_iter().map(|job| job.job_id).collect(),
    })
  }

  /// Schedule a single email outside any workflow.
  ///
  /// The job gets a batch of its own, so [`Scheduler::cancel_batch`] works on it too.
  pub async fn schedule_email(
    &self,
    recipient: &str,
    subject: &str,
    body: &str,
    send_at: DateTime<Utc>,
  ) -> Result<ScheduledJob, ScheduleError> {
    let recipient = check_recipient(recipient)?;
    if subject.trim().is_empty() {
      return Err(ScheduleError::MissingSubject);
    }

    let batch_id = uuid::Uuid::new_v4().to_string();
    let job = self
      .store
      .create(NewJob {
        batch_id: batch_id.clone(),
        workflow_id: None,
        node_id: None,
        recipient: recipient.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        send_at,
      })
      .await?;

    info!(job_id = %job.job_id, recipient, send_at = %job.send_at, "email scheduled");
    self.notifier.notify(JobEvent::Scheduled {
      batch_id,
      workflow_id: None,
      jobs_created: 1,
    });

    Ok(job)
  }

  /// Cancel one pending job.
  ///
  /// Unknown ids and jobs that were already sent are reported as errors.
  pub async fn cancel_job(&self, job_id: &str) -> Result<ScheduledJob, ScheduleError> {
    let job = self.store.cancel(job_id).await?;
    info!(job_id, "job cancelled");
    self.notifier.notify(JobEvent::Cancelled {
      job_id: job.job_id.clone(),
    });
    Ok(job)
  }

  /// Cancel every job of one schedule call that has not been sent yet.
  pub async fn cancel_batch(&self, batch_id: &str) -> Result<u64, ScheduleError> {
    let pending: HashSet<String> = self
      .store
      .list_batch(batch_id)
      .await?
      .into_iter()
      .filter(|job| job.state == JobState::Pending)
      .map(|job| job.job_id)
      .collect();

    let cancelled = self.store.cancel_batch(batch_id).await?;
    info!(batch_id, cancelled, "batch cancelled");

    for job in self.store.list_batch(batch_id).await? {
      if job.state == JobState::Cancelled && pending.contains(&job.job_id) {
        self.notifier.notify(JobEvent::Cancelled { job_id: job.job_id });
      }
    }
    Ok(cancelled)
  }

  pub async fn get_job(&self, job_id: &str) -> Result<ScheduledJob, ScheduleError> {
    Ok(self.store.get(job_id).await?)
  }

  /// Pending jobs due at `now`.
  pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, ScheduleError> {
    Ok(self.store.find_due(now, usize::MAX).await?)
  }

  pub async fn list_pending(&self) -> Result<Vec<ScheduledJob>, ScheduleError> {
    self.list(JobState::Pending).await
  }

  /// Sent jobs, most recently sent first.
  pub async fn list_sent(&self) -> Result<Vec<ScheduledJob>, ScheduleError> {
    let mut sent = self.list(JobState::Sent).await?;
    sent.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    Ok(sent)
  }

  pub async fn list_failed(&self) -> Result<Vec<ScheduledJob>, ScheduleError> {
    self.list(JobState::Failed).await
  }

  pub async fn list(&self, state: JobState) -> Result<Vec<ScheduledJob>, ScheduleError> {
    Ok(self.store.list(state).await?)
  }

  pub async fn list_batch(&self, batch_id: &str) -> Result<Vec<ScheduledJob>, ScheduleError> {
    Ok(self.store.list_batch(batch_id).await?)
  }
}

fn check_recipient(recipient: &str) -> Result<&str, ScheduleError> {
  let recipient = recipient.trim();
  if recipient.is_empty() {
    return Err(ScheduleError::MissingRecipient);
  }
  Ok(recipient)
}
