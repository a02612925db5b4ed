//! Polling worker that sends due jobs.
//!
//! Each poll cycle finds due jobs, claims each one right before sending, and
//! records the outcome. Sends within a cycle run concurrently, bounded by
//! [`WorkerConfig::max_concurrent_sends`]. A cycle always runs to completion
//! before the next tick is awaited, so cycles of one worker never overlap.
//!
//! Several workers may share a store. Each claim records the worker id and
//! claim time, so only one worker sends a given job, and a starting worker only
//! fails claims older than [`WorkerConfig::claim_lease`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use drip_mail::{DEFAULT_FROM, MailTransport, OutgoingEmail};
use drip_store::{JobStore, ScheduledJob};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::events::{JobEvent, JobNotifier, NoopNotifier};

const INTERRUPTED_REASON: &str = "worker stopped while sending; delivery unknown";

/// Configuration for a [`JobWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Identifies this worker on the jobs it claims.
  pub worker_id: String,
  /// Time between poll cycles.
  pub poll_interval: Duration,
  /// Maximum number of emails being sent at once.
  pub max_concurrent_sends: usize,
  /// Maximum number of due jobs picked up per cycle.
  pub batch_size: usize,
  /// Sender address on every outgoing email.
  pub sender: String,
  /// How long a claim may stay in flight before a starting worker treats it
  /// as abandoned. Must exceed the longest send.
  pub claim_lease: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      worker_id: uuid::Uuid::new_v4().to_string(),
      poll_interval: Duration::from_secs(60),
      max_concurrent_sends: 8,
      batch_size: 100,
      sender: DEFAULT_FROM.to_string(),
      claim_lease: Duration::from_secs(15 * 60),
    }
  }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
  /// Jobs found due.
  pub due: usize,
  pub sent: usize,
  pub failed: usize,
  /// Due jobs that were cancelled or claimed elsewhere before this worker got to them.
  pub skipped: usize,
  /// Emails the transport accepted but the store could not mark sent. The
  /// worker keeps retrying the record on later cycles.
  pub unrecorded: usize,
  /// Jobs that could not be claimed because of a store error. They stay
  /// pending and are picked up again next cycle.
  pub errors: usize,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
  Sent,
  Failed,
  Skipped,
  Unrecorded { sent_at: DateTime<Utc> },
  Errored,
}

/// A delivered email whose `Sent` state still has to be written.
#[derive(Debug, Clone)]
struct UnrecordedSend {
  job_id: String,
  recipient: String,
  sent_at: DateTime<Utc>,
}

/// Sends due jobs through a [`MailTransport`].
pub struct JobWorker<S, T> {
  store: Arc<S>,
  transport: Arc<T>,
  config: WorkerConfig,
  notifier: Arc<dyn JobNotifier>,
  semaphore: Arc<Semaphore>,
  unrecorded: Mutex<Vec<UnrecordedSend>>,
}

impl<S, T> JobWorker<S, T>
where
  S: JobStore + 'static,
  T: MailTransport + 'static,
{
  pub fn new(store: Arc<S>, transport: Arc<T>, config: WorkerConfig) -> Self {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_sends.max(1)));
    Self {
      store,
      transport,
      config,
      notifier: Arc::new(NoopNotifier),
      semaphore,
      unrecorded: Mutex::new(Vec::new()),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Run one poll cycle as of `now`.
  ///
  /// Only a failure to query due jobs is returned as an error. Failures of
  /// individual jobs are recorded on the job and counted in the report.
  pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport, WorkerError> {
    self.record_unrecorded().await;

    let due = self.store.find_due(now, self.config.batch_size).await?;
    let mut report = PollReport {
      due: due.len(),
      ..PollReport::default()
    };

    if due.is_empty() {
      return Ok(report);
    }

    debug!(due = report.due, "dispatching due jobs");

    let mut tasks = JoinSet::new();
    for job in due {
      let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
        // Only happens if the semaphore is closed, which this worker never does
        warn!("send pool closed, leaving remaining jobs pending");
        break;
      };

      let store = self.store.clone();
      let transport = self.transport.clone();
      let notifier = self.notifier.clone();
      let worker_id = self.config.worker_id.clone();
      let from = self.config.sender.clone();

      tasks.spawn(async move {
        let _permit = permit;
        let job_id = job.job_id.clone();
        let recipient = job.recipient.clone();
        let outcome = deliver(&*store, &*transport, &*notifier, &worker_id, &from, job).await;
        (job_id, recipient, outcome)
      });
    }

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((_, _, Outcome::Sent)) => report.sent += 1,
        Ok((_, _, Outcome::Failed)) => report.failed += 1,
        Ok((_, _, Outcome::Skipped)) => report.skipped += 1,
        Ok((_, _, Outcome::Errored)) => report.errors += 1,
        Ok((job_id, recipient, Outcome::Unrecorded { sent_at })) => {
          report.unrecorded += 1;
          self.lock_unrecorded().push(UnrecordedSend {
            job_id,
            recipient,
            sent_at,
          });
        }
        Err(e) => {
          error!(error = %e, "send task panicked");
          report.errors += 1;
        }
      }
    }

    Ok(report)
  }

  /// Run the poll loop until `cancel` is triggered.
  ///
  /// Claims older than the lease, left in flight by a worker that stopped, are
  /// marked failed first; they are never sent again. Cancellation is observed
  /// between cycles.
  pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
    let cutoff = TimeDelta::from_std(self.config.claim_lease)
      .ok()
      .and_then(|lease| Utc::now().checked_sub_signed(lease));
    if let Some(cutoff) = cutoff {
      let recovered = self
        .store
        .recover_interrupted(INTERRUPTED_REASON, cutoff)
        .await?;
      if recovered > 0 {
        warn!(recovered, "marked abandoned in-flight jobs as failed");
      }
    }

    info!(
      worker_id = %self.config.worker_id,
      poll_interval_ms = self.config.poll_interval.as_millis() as u64,
      max_concurrent_sends = self.config.max_concurrent_sends,
      batch_size = self.config.batch_size,
      "starting job worker"
    );

    let mut ticker = interval(self.config.poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
          _ = cancel.cancelled() => {
              info!(worker_id = %self.config.worker_id, "job worker cancelled");
              break;
          }
          _ = ticker.tick() => {}
      }

      match self.poll_once(Utc::now()).await {
        Ok(report) if report.due > 0 => {
          info!(
            due = report.due,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            unrecorded = report.unrecorded,
            errors = report.errors,
            "poll cycle completed"
          );
        }
        Ok(_) => debug!("no due jobs"),
        Err(e) => error!(error = %e, "poll cycle failed"),
      }
    }

    let unrecorded = self.lock_unrecorded().len();
    if unrecorded > 0 {
      error!(unrecorded, "stopping with delivered emails not marked sent");
    }

    Ok(())
  }

  fn lock_unrecorded(&self) -> std::sync::MutexGuard<'_, Vec<UnrecordedSend>> {
    self.unrecorded.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Retry writing `Sent` for emails delivered in earlier cycles.
  async fn record_unrecorded(&self) {
    let pending = std::mem::take(&mut *self.lock_unrecorded());
    let mut still_unrecorded = Vec::new();

    for send in pending {
      match self.store.mark_sent(&send.job_id, send.sent_at).await {
        Ok(()) => {
          info!(job_id = %send.job_id, "recorded earlier delivery");
          self.notifier.notify(JobEvent::Sent {
            job_id: send.job_id,
            recipient: send.recipient,
          });
        }
        Err(e) => {
          warn!(job_id = %send.job_id, error = %e, "delivered email still not marked sent");
          still_unrecorded.push(send);
        }
      }
    }

    self.lock_unrecorded().extend(still_unrecorded);
  }
}

async fn deliver<S, T>(
  store: &S,
  transport: &T,
  notifier: &dyn JobNotifier,
  worker_id: &str,
  from: &str,
  job: ScheduledJob,
) -> Outcome
where
  S: JobStore + ?Sized,
  T: MailTransport + ?Sized,
{
  // Re-check right before sending; the job may have been cancelled since it was found
  match store.claim(&job.job_id, worker_id, Utc::now()).await {
    Ok(true) => {}
    Ok(false) => {
      debug!(job_id = %job.job_id, "job no longer pending, skipping");
      notifier.notify(JobEvent::Skipped { job_id: job.job_id });
      return Outcome::Skipped;
    }
    Err(e) => {
      error!(job_id = %job.job_id, error = %e, "failed to claim job");
      return Outcome::Errored;
    }
  }

  let email = OutgoingEmail {
    from: from.to_string(),
    to: job.recipient,
    subject: job.subject,
    body: job.body,
  };

  match transport.send(&email).await {
    Ok(()) => {
      let sent_at = Utc::now();
      if let Err(e) = store.mark_sent(&job.job_id, sent_at).await {
        error!(
          job_id = %job.job_id,
          to = %email.to,
          error = %e,
          "email delivered but not marked sent"
        );
        return Outcome::Unrecorded { sent_at };
      }
      info!(job_id = %job.job_id, node_id = ?job.node_id, to = %email.to, "job sent");
      notifier.notify(JobEvent::Sent {
        job_id: job.job_id,
        recipient: email.to,
      });
      Outcome::Sent
    }
    Err(e) => {
      let reason = e.to_string();
      error!(job_id = %job.job_id, to = %email.to, error = %e, "job send failed");
      if let Err(store_err) = store.mark_failed(&job.job_id, &reason).await {
        // Stays in flight until its lease runs out, then recovery fails it
        error!(job_id = %job.job_id, error = %store_err, "failed to record send failure");
      }
      notifier.notify(JobEvent::Failed {
        job_id: job.job_id,
        error: reason,
      });
      Outcome::Failed
    }
  }
}
