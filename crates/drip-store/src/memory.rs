use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::truncate_millis;
use crate::{Error, JobState, JobStore, NewJob, ScheduledJob};

/// In-memory job store.
///
/// Same semantics as [`SqliteStore`](crate::SqliteStore), without durability.
/// Used for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  jobs: HashMap<String, ScheduledJob>,
  next_seq: i64,
}

impl Inner {
  fn insert(&mut self, job: NewJob) -> ScheduledJob {
    self.next_seq += 1;
    let job = ScheduledJob {
      job_id: uuid::Uuid::new_v4().to_string(),
      seq: self.next_seq,
      batch_id: job.batch_id,
      workflow_id: job.workflow_id,
      node_id: job.node_id,
      recipient: job.recipient,
      subject: job.subject,
      body: job.body,
      send_at: truncate_millis(job.send_at),
      state: JobState::Pending,
      created_at: truncate_millis(Utc::now()),
      claimed_by: None,
      claimed_at: None,
      sent_at: None,
      error: None,
    };
    self.jobs.insert(job.job_id.clone(), job.clone());
    job
  }

  fn job_mut(&mut self, job_id: &str) -> Result<&mut ScheduledJob, Error> {
    self
      .jobs
      .get_mut(job_id)
      .ok_or_else(|| Error::NotFound(job_id.to_string()))
  }

  fn sorted(&self, filter: impl Fn(&ScheduledJob) -> bool) -> Vec<ScheduledJob> {
    let mut jobs: Vec<ScheduledJob> = self.jobs.values().filter(|j| filter(j)).cloned().collect();
    jobs.sort_by(|a, b| a.send_at.cmp(&b.send_at).then(a.seq.cmp(&b.seq)));
    jobs
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl JobStore for MemoryStore {
  async fn create(&self, job: NewJob) -> Result<ScheduledJob, Error> {
    Ok(self.lock().insert(job))
  }

  async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>, Error> {
    // One lock for the whole batch, so no reader sees a partial set
    let mut inner = self.lock();
    Ok(jobs.into_iter().map(|job| inner.insert(job)).collect())
  }

  async fn get(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    self.lock().job_mut(job_id).map(|job| job.clone())
  }

  async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, Error> {
    let mut due = self
      .lock()
      .sorted(|job| job.state == JobState::Pending && job.send_at <= now);
    due.truncate(limit);
    Ok(due)
  }

  async fn claim(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool, Error> {
    let mut inner = self.lock();
    let job = inner.job_mut(job_id)?;
    if job.state != JobState::Pending {
      return Ok(false);
    }
    job.state = JobState::InFlight;
    job.claimed_by = Some(worker_id.to_string());
    job.claimed_at = Some(truncate_millis(now));
    Ok(true)
  }

  async fn mark_sent(&self, job_id: &str, sent_at: DateTime<Utc>) -> Result<(), Error> {
    let mut inner = self.lock();
    let job = inner.job_mut(job_id)?;
    if !job.state.is_terminal() {
      job.state = JobState::Sent;
      job.sent_at = Some(truncate_millis(sent_at));
    }
    Ok(())
  }

  async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), Error> {
    let mut inner = self.lock();
    let job = inner.job_mut(job_id)?;
    if !job.state.is_terminal() {
      job.state = JobState::Failed;
      job.error = Some(reason.to_string());
    }
    Ok(())
  }

  async fn cancel(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    let mut inner = self.lock();
    let job = inner.job_mut(job_id)?;
    match job.state {
      JobState::Pending => {
        job.state = JobState::Cancelled;
        Ok(job.clone())
      }
      JobState::Cancelled => Ok(job.clone()),
      state => Err(Error::InvalidState {
        job_id: job_id.to_string(),
        state,
      }),
    }
  }

  async fn cancel_batch(&self, batch_id: &str) -> Result<u64, Error> {
    let mut inner = self.lock();
    let mut cancelled = 0;
    for job in inner.jobs.values_mut() {
      if job.batch_id == batch_id && job.state == JobState::Pending {
        job.state = JobState::Cancelled;
        cancelled += 1;
      }
    }
    Ok(cancelled)
  }

  async fn list(&self, state: JobState) -> Result<Vec<ScheduledJob>, Error> {
    Ok(self.lock().sorted(|job| job.state == state))
  }

  async fn list_batch(&self, batch_id: &str) -> Result<Vec<ScheduledJob>, Error> {
    let mut jobs = self.lock().sorted(|job| job.batch_id == batch_id);
    jobs.sort_by_key(|job| job.seq);
    Ok(jobs)
  }

  async fn recover_interrupted(
    &self,
    reason: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<u64, Error> {
    let claimed_before = truncate_millis(claimed_before);
    let mut inner = self.lock();
    let mut recovered = 0;
    for job in inner.jobs.values_mut() {
      let expired = job.claimed_at.is_some_and(|at| at < claimed_before);
      if job.state == JobState::InFlight && expired {
        job.state = JobState::Failed;
        job.error = Some(reason.to_string());
        recovered += 1;
      }
    }
    Ok(recovered)
  }
}
