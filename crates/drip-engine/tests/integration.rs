//! End-to-end tests for scheduling and sending against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use drip_compiler::GraphError;
use drip_config::WorkflowDef;
use drip_engine::{
  ChannelNotifier, JobEvent, JobWorker, PollReport, ScheduleError, Scheduler, SourceError,
  WorkerConfig, WorkflowSource,
};
use drip_mail::{MailTransport, OutgoingEmail, TransportError};
use drip_store::{Error as StoreError, JobState, JobStore, MemoryStore, NewJob, ScheduledJob};
use drip_workflow::ValidationError;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn start() -> DateTime<Utc> {
  "2024-06-01T12:00:00Z".parse().unwrap()
}

/// Workflow source backed by a map.
#[derive(Default)]
struct MapSource {
  workflows: HashMap<String, WorkflowDef>,
}

impl MapSource {
  fn with(mut self, workflow_id: &str, document: serde_json::Value) -> Self {
    let mut def: WorkflowDef = serde_json::from_value(document).unwrap();
    def.workflow_id = workflow_id.to_string();
    self.workflows.insert(workflow_id.to_string(), def);
    self
  }
}

#[async_trait]
impl WorkflowSource for MapSource {
  async fn load(&self, workflow_id: &str) -> Result<WorkflowDef, SourceError> {
    self
      .workflows
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| SourceError::NotFound(workflow_id.to_string()))
  }
}

/// Transport that records every email and rejects subjects listed in `reject`.
#[derive(Default)]
struct RecordingTransport {
  sent: Mutex<Vec<OutgoingEmail>>,
  reject: Vec<String>,
  delay: Option<Duration>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl RecordingTransport {
  fn rejecting(subject: &str) -> Self {
    Self {
      reject: vec![subject.to_string()],
      ..Self::default()
    }
  }

  fn slow(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  fn sent(&self) -> Vec<OutgoingEmail> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl MailTransport for RecordingTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
    let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(current, Ordering::SeqCst);

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.reject.contains(&email.subject) {
      return Err(TransportError::Rejected {
        reason: "mailbox unavailable".to_string(),
      });
    }
    self.sent.lock().unwrap().push(email.clone());
    Ok(())
  }
}

/// Store wrapper that injects races and write failures.
#[derive(Default)]
struct FaultyStore {
  inner: MemoryStore,
  /// Cancel every job right after reporting it due, as if a cancellation
  /// raced with the poll.
  cancel_after_find: bool,
  /// Fail the first `mark_sent` for the job with this subject.
  fail_mark_sent_once: Mutex<Option<String>>,
}

impl FaultyStore {
  fn cancelling() -> Self {
    Self {
      cancel_after_find: true,
      ..Self::default()
    }
  }

  fn failing_mark_sent(subject: &str) -> Self {
    Self {
      fail_mark_sent_once: Mutex::new(Some(subject.to_string())),
      ..Self::default()
    }
  }
}

#[async_trait]
impl JobStore for FaultyStore {
  async fn create(&self, job: NewJob) -> Result<ScheduledJob, StoreError> {
    self.inner.create(job).await
  }

  async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>, StoreError> {
    self.inner.create_batch(jobs).await
  }

  async fn get(&self, job_id: &str) -> Result<ScheduledJob, StoreError> {
    self.inner.get(job_id).await
  }

  async fn find_due(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<ScheduledJob>, StoreError> {
    let due = self.inner.find_due(now, limit).await?;
    if self.cancel_after_find {
      for job in &due {
        self.inner.cancel(&job.job_id).await?;
      }
    }
    Ok(due)
  }

  async fn claim(
    &self,
    job_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    self.inner.claim(job_id, worker_id, now).await
  }

  async fn mark_sent(&self, job_id: &str, sent_at: DateTime<Utc>) -> Result<(), StoreError> {
    let subject = self.inner.get(job_id).await?.subject;
    {
      let mut fail = self.fail_mark_sent_once.lock().unwrap();
      if fail.as_deref() == Some(subject.as_str()) {
        *fail = None;
        return Err(StoreError::InvalidRecord("disk I/O error".to_string()));
      }
    }
    self.inner.mark_sent(job_id, sent_at).await
  }

  async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), StoreError> {
    self.inner.mark_failed(job_id, reason).await
  }

  async fn cancel(&self, job_id: &str) -> Result<ScheduledJob, StoreError> {
    self.inner.cancel(job_id).await
  }

  async fn cancel_batch(&self, batch_id: &str) -> Result<u64, StoreError> {
    self.inner.cancel_batch(batch_id).await
  }

  async fn list(&self, state: JobState) -> Result<Vec<ScheduledJob>, StoreError> {
    self.inner.list(state).await
  }

  async fn list_batch(&self, batch_id: &str) -> Result<Vec<ScheduledJob>, StoreError> {
    self.inner.list_batch(batch_id).await
  }

  async fn recover_interrupted(
    &self,
    reason: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    self.inner.recover_interrupted(reason, claimed_before).await
  }
}

/// Lead → wait 2 days → "Hi", plus a same-day "Welcome" straight off the lead.
fn drip_campaign() -> serde_json::Value {
  json!({
    "name": "Campaign",
    "nodes": [
      { "id": "lead", "type": "leadSource", "data": { "label": "Signups" } },
      { "id": "welcome", "type": "coldEmail", "data": { "subject": "Welcome", "message": "Glad you're here" } },
      { "id": "wait", "type": "delay", "data": { "delay": "2", "unit": "day" } },
      { "id": "hi", "type": "coldEmail", "data": { "subject": "Hi", "message": "Checking in" } }
    ],
    "edges": [
      { "source": "lead", "target": "welcome" },
      { "source": "lead", "target": "wait" },
      { "source": "wait", "target": "hi" }
    ]
  })
}

/// `count` lead sources, each with its own immediate email.
fn immediate_emails(count: usize) -> serde_json::Value {
  let mut nodes = Vec::new();
  let mut edges = Vec::new();
  for i in 0..count {
    nodes.push(json!({ "id": format!("lead-{}", i), "type": "leadSource" }));
    nodes.push(json!({
      "id": format!("email-{}", i),
      "type": "coldEmail",
      "data": { "subject": format!("Email {}", i), "message": "body" }
    }));
    edges.push(json!({ "source": format!("lead-{}", i), "target": format!("email-{}", i) }));
  }
  json!({ "nodes": nodes, "edges": edges })
}

fn scheduler(source: MapSource) -> (Arc<MemoryStore>, Scheduler<MemoryStore, MapSource>) {
  let store = Arc::new(MemoryStore::new());
  (store.clone(), Scheduler::new(store, source))
}

fn worker<T: MailTransport + 'static>(
  store: Arc<MemoryStore>,
  transport: Arc<T>,
) -> JobWorker<MemoryStore, T> {
  JobWorker::new(
    store,
    transport,
    WorkerConfig {
      sender: "drip@example.com".to_string(),
      ..WorkerConfig::default()
    },
  )
}

#[tokio::test]
async fn test_schedule_creates_one_job_per_email() {
  let (_, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));

  let receipt = scheduler
    .schedule_workflow("campaign", "lead@example.com", start())
    .await
    .unwrap();

  assert_eq!(receipt.workflow_id, "campaign");
  assert_eq!(receipt.jobs_created, 2);
  assert_eq!(receipt.job_ids.len(), 2);

  let pending = scheduler.list_pending().await.unwrap();
  let schedule: Vec<_> = pending
    .iter()
    .map(|job| (job.subject.as_str(), job.send_at))
    .collect();
  assert_eq!(
    schedule,
    vec![
      ("Welcome", start()),
      ("Hi", start() + TimeDelta::hours(48)),
    ]
  );
  assert!(pending.iter().all(|job| job.batch_id == receipt.batch_id));
  assert!(pending.iter().all(|job| job.recipient == "lead@example.com"));
}

#[tokio::test]
async fn test_blank_recipient_is_rejected() {
  let (_, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));

  let result = scheduler.schedule_workflow("campaign", "  ", start()).await;

  assert!(matches!(result, Err(ScheduleError::MissingRecipient)));
  assert!(scheduler.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_workflow_creates_nothing() {
  let document = json!({
    "nodes": [
      { "id": "lead", "type": "leadSource" },
      { "id": "hello", "type": "coldEmail", "data": { "subject": "Hello" } }
    ],
    "edges": [
      { "source": "lead", "target": "hello" },
      { "source": "hello", "target": "ghost" }
    ]
  });
  let (_, scheduler) = scheduler(MapSource::default().with("broken", document));

  let result = scheduler
    .schedule_workflow("broken", "lead@example.com", start())
    .await;

  assert!(matches!(
    result,
    Err(ScheduleError::Graph(GraphError::Invalid(
      ValidationError::DanglingEdge { .. }
    )))
  ));
  assert!(scheduler.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_workflow_is_source_error() {
  let (_, scheduler) = scheduler(MapSource::default());

  let result = scheduler
    .schedule_workflow("missing", "lead@example.com", start())
    .await;

  assert!(matches!(
    result,
    Err(ScheduleError::Source(SourceError::NotFound(_)))
  ));
}

#[tokio::test]
async fn test_workflow_without_emails_schedules_nothing() {
  let document = json!({
    "nodes": [
      { "id": "lead", "type": "leadSource" },
      { "id": "wait", "type": "delay", "data": { "delay": 1, "unit": "hour" } }
    ],
    "edges": [{ "source": "lead", "target": "wait" }]
  });
  let (_, scheduler) = scheduler(MapSource::default().with("quiet", document));

  let receipt = scheduler
    .schedule_workflow("quiet", "lead@example.com", start())
    .await
    .unwrap();

  assert_eq!(receipt.jobs_created, 0);
}

#[tokio::test]
async fn test_worker_sends_only_due_jobs() {
  let (store, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));
  scheduler
    .schedule_workflow("campaign", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let worker = worker(store.clone(), transport.clone());

  let report = worker.poll_once(start()).await.unwrap();
  assert_eq!(
    report,
    PollReport {
      due: 1,
      sent: 1,
      failed: 0,
      skipped: 0,
      unrecorded: 0,
      errors: 0,
    }
  );

  let sent = transport.sent();
  assert_eq!(sent.len(), 1);
  assert_eq!(
    sent[0],
    OutgoingEmail {
      from: "drip@example.com".to_string(),
      to: "lead@example.com".to_string(),
      subject: "Welcome".to_string(),
      body: "Glad you're here".to_string(),
    }
  );

  // The same instant again finds nothing left to do
  assert_eq!(worker.poll_once(start()).await.unwrap().due, 0);

  // Two days later the follow-up goes out
  let later = start() + TimeDelta::hours(48);
  assert_eq!(worker.poll_once(later).await.unwrap().sent, 1);

  let sent_jobs = scheduler.list_sent().await.unwrap();
  assert_eq!(sent_jobs.len(), 2);
  assert!(sent_jobs.iter().all(|job| job.sent_at.is_some()));
  assert!(scheduler.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transport_failure_is_isolated_per_job() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(3)));
  scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::rejecting("Email 1"));
  let (tx, mut rx) = mpsc::unbounded_channel();
  let worker = worker(store.clone(), transport.clone())
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));

  let report = worker.poll_once(start()).await.unwrap();

  assert_eq!(report.due, 3);
  assert_eq!(report.sent, 2);
  assert_eq!(report.failed, 1);
  assert_eq!(transport.sent().len(), 2);

  let failed = scheduler.list_failed().await.unwrap();
  assert_eq!(failed.len(), 1);
  assert_eq!(failed[0].subject, "Email 1");
  assert_eq!(
    failed[0].error.as_deref(),
    Some("message rejected: mailbox unavailable")
  );

  // Failed jobs are not retried
  assert_eq!(worker.poll_once(start()).await.unwrap().due, 0);

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  assert_eq!(events.len(), 3);
  assert!(events.contains(&JobEvent::Failed {
    job_id: failed[0].job_id.clone(),
    error: "message rejected: mailbox unavailable".to_string(),
  }));
}

#[tokio::test]
async fn test_cancelled_job_is_never_sent() {
  let (store, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));
  let receipt = scheduler
    .schedule_workflow("campaign", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let worker = worker(store.clone(), transport.clone());

  for job_id in &receipt.job_ids {
    let cancelled = scheduler.cancel_job(job_id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
  }

  let report = worker
    .poll_once(start() + TimeDelta::days(7))
    .await
    .unwrap();
  assert_eq!(report.due, 0);
  assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_job_cancelled_after_poll_is_skipped() {
  let store = Arc::new(FaultyStore::cancelling());
  let scheduler = Scheduler::new(
    store.clone(),
    MapSource::default().with("many", immediate_emails(2)),
  );
  scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let worker = JobWorker::new(store, transport.clone(), WorkerConfig::default());

  let report = worker.poll_once(start()).await.unwrap();

  assert_eq!(report.due, 2);
  assert_eq!(report.skipped, 2);
  assert!(transport.sent().is_empty());
  assert_eq!(scheduler.list(JobState::Cancelled).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelling_sent_job_is_reported() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(1)));
  let receipt = scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let worker = worker(
    store.clone(),
    Arc::new(RecordingTransport::default()),
  );
  worker.poll_once(start()).await.unwrap();
  let job_id = &receipt.job_ids[0];
  let sent_at = scheduler.get_job(job_id).await.unwrap().sent_at;

  let result = scheduler.cancel_job(job_id).await;

  assert!(matches!(
    result,
    Err(ScheduleError::Store(StoreError::InvalidState {
      state: JobState::Sent,
      ..
    }))
  ));
  let job = scheduler.get_job(job_id).await.unwrap();
  assert_eq!(job.state, JobState::Sent);
  assert_eq!(job.sent_at, sent_at);

  assert!(matches!(
    scheduler.cancel_job("no-such-job").await,
    Err(ScheduleError::Store(StoreError::NotFound(_)))
  ));
}

#[tokio::test]
async fn test_cancel_batch_stops_remaining_emails() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let (store, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));
  let scheduler = scheduler.with_notifier(Arc::new(ChannelNotifier::new(tx)));
  let receipt = scheduler
    .schedule_workflow("campaign", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let worker = worker(store.clone(), transport.clone());

  // The welcome email goes out, then the lead unsubscribes
  worker.poll_once(start()).await.unwrap();
  let cancelled = scheduler.cancel_batch(&receipt.batch_id).await.unwrap();
  assert_eq!(cancelled, 1);

  let report = worker
    .poll_once(start() + TimeDelta::days(7))
    .await
    .unwrap();
  assert_eq!(report.due, 0);
  assert_eq!(transport.sent().len(), 1);

  let states: Vec<_> = scheduler
    .list_batch(&receipt.batch_id)
    .await
    .unwrap()
    .into_iter()
    .map(|job| (job.subject, job.state))
    .collect();
  assert_eq!(
    states,
    vec![
      ("Welcome".to_string(), JobState::Sent),
      ("Hi".to_string(), JobState::Cancelled),
    ]
  );

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  assert!(matches!(
    events.as_slice(),
    [
      JobEvent::Scheduled {
        jobs_created: 2,
        ..
      },
      JobEvent::Cancelled { .. }
    ]
  ));
}

#[tokio::test]
async fn test_sends_are_bounded_by_pool_size() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(6)));
  scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(20)));
  let worker = JobWorker::new(
    store.clone(),
    transport.clone(),
    WorkerConfig {
      max_concurrent_sends: 2,
      ..WorkerConfig::default()
    },
  );

  let report = worker.poll_once(start()).await.unwrap();

  assert_eq!(report.sent, 6);
  assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_overlapping_polls_send_each_job_once() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(10)));
  scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::slow(Duration::from_millis(1)));
  let first = worker(store.clone(), transport.clone());
  let second = worker(store.clone(), transport.clone());

  let (a, b) = tokio::join!(first.poll_once(start()), second.poll_once(start()));
  let (a, b) = (a.unwrap(), b.unwrap());

  assert_eq!(a.sent + b.sent, 10);
  assert_eq!(transport.sent().len(), 10);
  assert_eq!(scheduler.list_sent().await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_run_sends_until_cancelled() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(1)));
  scheduler
    .schedule_workflow("many", "lead@example.com", Utc::now())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let worker = JobWorker::new(
    store.clone(),
    transport.clone(),
    WorkerConfig {
      poll_interval: Duration::from_millis(10),
      ..WorkerConfig::default()
    },
  );

  let cancel = CancellationToken::new();
  let cancel_clone = cancel.clone();
  let handle = tokio::spawn(async move { worker.run(cancel_clone).await });

  for _ in 0..100 {
    if !transport.sent().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  cancel.cancel();

  assert!(handle.await.unwrap().is_ok());
  assert_eq!(transport.sent().len(), 1);
  assert_eq!(scheduler.list_sent().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_fails_jobs_interrupted_mid_send() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(2)));
  let receipt = scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  // A previous worker claimed this job long ago and stopped before recording
  // the outcome
  let interrupted = &receipt.job_ids[0];
  assert!(store.claim(interrupted, "gone", start()).await.unwrap());

  let transport = Arc::new(RecordingTransport::default());
  let worker = JobWorker::new(
    store.clone(),
    transport.clone(),
    WorkerConfig {
      poll_interval: Duration::from_millis(10),
      ..WorkerConfig::default()
    },
  );
  let cancel = CancellationToken::new();
  let cancel_clone = cancel.clone();
  let handle = tokio::spawn(async move { worker.run(cancel_clone).await });

  for _ in 0..100 {
    if !transport.sent().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  cancel.cancel();
  handle.await.unwrap().unwrap();

  let job = store.get(interrupted).await.unwrap();
  assert_eq!(job.state, JobState::Failed);
  assert!(job.error.is_some());
  assert_eq!(transport.sent().len(), 1);
  assert_eq!(transport.sent()[0].subject, "Email 1");
}

#[tokio::test]
async fn test_starting_worker_leaves_live_claims_alone() {
  let (store, scheduler) = scheduler(MapSource::default().with("many", immediate_emails(1)));
  let receipt = scheduler
    .schedule_workflow("many", "lead@example.com", Utc::now())
    .await
    .unwrap();
  let job_id = receipt.job_ids[0].clone();

  let busy = worker(
    store.clone(),
    Arc::new(RecordingTransport::slow(Duration::from_millis(200))),
  );
  let sending = tokio::spawn(async move { busy.poll_once(Utc::now()).await });

  // A second worker comes up while the first is mid-send
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(store.get(&job_id).await.unwrap().state, JobState::InFlight);
  let late = worker(store.clone(), Arc::new(RecordingTransport::default()));
  let cancel = CancellationToken::new();
  let cancel_clone = cancel.clone();
  let handle = tokio::spawn(async move { late.run(cancel_clone).await });

  let report = sending.await.unwrap().unwrap();
  cancel.cancel();
  handle.await.unwrap().unwrap();

  assert_eq!(report.sent, 1);
  let job = store.get(&job_id).await.unwrap();
  assert_eq!(job.state, JobState::Sent);
  assert!(job.sent_at.is_some());
  assert!(job.error.is_none());
}

#[tokio::test]
async fn test_delivered_but_unrecorded_send_is_retried() {
  let store = Arc::new(FaultyStore::failing_mark_sent("Email 1"));
  let scheduler = Scheduler::new(
    store.clone(),
    MapSource::default().with("many", immediate_emails(3)),
  );
  scheduler
    .schedule_workflow("many", "lead@example.com", start())
    .await
    .unwrap();
  let transport = Arc::new(RecordingTransport::default());
  let (tx, mut rx) = mpsc::unbounded_channel();
  let worker = JobWorker::new(store.clone(), transport.clone(), WorkerConfig::default())
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));

  let report = worker.poll_once(start()).await.unwrap();

  assert_eq!(report.due, 3);
  assert_eq!(report.sent, 2);
  assert_eq!(report.unrecorded, 1);
  assert_eq!(report.failed, 0);
  assert_eq!(report.errors, 0);
  assert_eq!(transport.sent().len(), 3);
  assert_eq!(scheduler.list_sent().await.unwrap().len(), 2);
  assert!(scheduler.list_failed().await.unwrap().is_empty());

  let stuck = scheduler.list(JobState::InFlight).await.unwrap();
  assert_eq!(stuck.len(), 1);
  assert_eq!(stuck[0].subject, "Email 1");
  while rx.try_recv().is_ok() {}

  // The next cycle records the delivery without sending it again
  let report = worker.poll_once(start()).await.unwrap();
  assert_eq!(report.due, 0);
  assert_eq!(transport.sent().len(), 3);

  let job = scheduler.get_job(&stuck[0].job_id).await.unwrap();
  assert_eq!(job.state, JobState::Sent);
  assert!(job.sent_at.is_some());
  assert_eq!(
    rx.try_recv().unwrap(),
    JobEvent::Sent {
      job_id: job.job_id,
      recipient: "lead@example.com".to_string(),
    }
  );
}

#[tokio::test]
async fn test_schedule_single_email() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let (store, scheduler) = scheduler(MapSource::default());
  let scheduler = scheduler.with_notifier(Arc::new(ChannelNotifier::new(tx)));
  let send_at = start() + TimeDelta::hours(1);

  let job = scheduler
    .schedule_email("lead@example.com", "Quick note", "Just saying hi", send_at)
    .await
    .unwrap();

  assert_eq!(job.state, JobState::Pending);
  assert_eq!(job.send_at, send_at);
  assert_eq!(job.workflow_id, None);
  assert_eq!(job.node_id, None);
  assert_eq!(
    rx.try_recv().unwrap(),
    JobEvent::Scheduled {
      batch_id: job.batch_id.clone(),
      workflow_id: None,
      jobs_created: 1,
    }
  );

  let transport = Arc::new(RecordingTransport::default());
  let worker = worker(store.clone(), transport.clone());
  assert_eq!(worker.poll_once(start()).await.unwrap().due, 0);
  assert_eq!(worker.poll_once(send_at).await.unwrap().sent, 1);

  let sent = transport.sent();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].to, "lead@example.com");
  assert_eq!(sent[0].subject, "Quick note");
  assert_eq!(sent[0].body, "Just saying hi");
  assert_eq!(
    scheduler.get_job(&job.job_id).await.unwrap().state,
    JobState::Sent
  );
}

#[tokio::test]
async fn test_single_email_needs_recipient_and_subject() {
  let (_, scheduler) = scheduler(MapSource::default());

  assert!(matches!(
    scheduler.schedule_email(" ", "Hello", "body", start()).await,
    Err(ScheduleError::MissingRecipient)
  ));
  assert!(matches!(
    scheduler
      .schedule_email("lead@example.com", "", "body", start())
      .await,
    Err(ScheduleError::MissingSubject)
  ));
  assert!(scheduler.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_sent_is_newest_first() {
  let (store, scheduler) = scheduler(MapSource::default().with("campaign", drip_campaign()));
  scheduler
    .schedule_workflow("campaign", "lead@example.com", start())
    .await
    .unwrap();
  let worker = worker(store.clone(), Arc::new(RecordingTransport::default()));

  worker.poll_once(start()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  worker
    .poll_once(start() + TimeDelta::hours(48))
    .await
    .unwrap();

  let subjects: Vec<_> = scheduler
    .list_sent()
    .await
    .unwrap()
    .into_iter()
    .map(|job| job.subject)
    .collect();
  assert_eq!(subjects, vec!["Hi".to_string(), "Welcome".to_string()]);
}
