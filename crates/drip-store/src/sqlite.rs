use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::types::{JobRow, truncate_millis};
use crate::{Error, JobState, JobStore, NewJob, ScheduledJob};

const JOB_COLUMNS: &str = "seq, job_id, batch_id, workflow_id, node_id, recipient, subject, body, \
                           send_at, state, created_at, claimed_by, claimed_at, sent_at, error";

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// Maximum number of connections in the pool.
  pub max_connections: u32,
  /// Maximum time to wait for a connection from the pool.
  pub acquire_timeout: Duration,
  /// How long a writer waits on a locked database before giving up.
  pub busy_timeout: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_connections: 8,
      acquire_timeout: Duration::from_secs(30),
      busy_timeout: Duration::from_secs(5),
    }
  }
}

/// SQLite-based job store.
///
/// Every job state lives in the `scheduled_jobs` table, so a restarted worker
/// picks up all pending jobs without any extra recovery step.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  ///
  /// The schema is not touched; call [`SqliteStore::migrate`] first on a new database.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
    Self::connect_with(path, PoolConfig::default()).await
  }

  /// Open a database file with a custom pool configuration and run migrations.
  pub async fn connect_with(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self, Error> {
    let path = path.as_ref();
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .synchronous(SqliteSynchronous::Normal)
      .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
      .max_connections(config.max_connections)
      .acquire_timeout(config.acquire_timeout)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    info!(path = %path.display(), "opened job store");
    Ok(store)
  }

  /// Create a store backed by a private in-memory database.
  ///
  /// Uses a single long-lived connection; the data is gone once the store is dropped.
  pub async fn in_memory() -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn insert<'e, E>(executor: E, job: NewJob) -> Result<ScheduledJob, Error>
  where
    E: sqlx::Executor<'e, Database = Sqlite>,
  {
    let job_id = uuid::Uuid::new_v4().to_string();
    let created_at = truncate_millis(Utc::now());
    let send_at = truncate_millis(job.send_at);

    let seq: i64 = sqlx::query_scalar(
      r#"
      INSERT INTO scheduled_jobs
        (job_id, batch_id, workflow_id, node_id, recipient, subject, body, send_at, state, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      RETURNING seq
      "#,
    )
    .bind(&job_id)
    .bind(&job.batch_id)
    .bind(&job.workflow_id)
    .bind(&job.node_id)
    .bind(&job.recipient)
    .bind(&job.subject)
    .bind(&job.body)
    .bind(send_at.timestamp_millis())
    .bind(JobState::Pending)
    .bind(created_at.timestamp_millis())
    .fetch_one(executor)
    .await?;

    Ok(ScheduledJob {
      job_id,
      seq,
      batch_id: job.batch_id,
      workflow_id: job.workflow_id,
      node_id: job.node_id,
      recipient: job.recipient,
      subject: job.subject,
      body: job.body,
      send_at,
      state: JobState::Pending,
      created_at,
      claimed_by: None,
      claimed_at: None,
      sent_at: None,
      error: None,
    })
  }

  /// Fetch a job, mapping a missing row to [`Error::NotFound`].
  async fn fetch(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
      "SELECT {} FROM scheduled_jobs WHERE job_id = ?",
      JOB_COLUMNS
    ))
    .bind(job_id)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => row.try_into(),
      None => Err(Error::NotFound(job_id.to_string())),
    }
  }
}

#[async_trait]
impl JobStore for SqliteStore {
  async fn create(&self, job: NewJob) -> Result<ScheduledJob, Error> {
    let job = Self::insert(&self.pool, job).await?;
    debug!(job_id = %job.job_id, send_at = %job.send_at, "created job");
    Ok(job)
  }

  async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<ScheduledJob>, Error> {
    let mut tx = self.pool.begin().await?;
    let mut created = Vec::with_capacity(jobs.len());
    for job in jobs {
      created.push(Self::insert(&mut *tx, job).await?);
    }
    tx.commit().await?;

    debug!(count = created.len(), "created job batch");
    Ok(created)
  }

  async fn get(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    self.fetch(job_id).await
  }

  async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
      r#"
      SELECT {}
      FROM scheduled_jobs
      WHERE state = ? AND send_at <= ?
      ORDER BY send_at ASC, seq ASC
      LIMIT ?
      "#,
      JOB_COLUMNS
    ))
    .bind(JobState::Pending)
    .bind(now.timestamp_millis())
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(ScheduledJob::try_from).collect()
  }

  async fn claim(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE scheduled_jobs
      SET state = ?, claimed_by = ?, claimed_at = ?
      WHERE job_id = ? AND state = ?
      "#,
    )
    .bind(JobState::InFlight)
    .bind(worker_id)
    .bind(now.timestamp_millis())
    .bind(job_id)
    .bind(JobState::Pending)
    .execute(&self.pool)
    .await?;

    // Zero rows: cancelled, or claimed by another worker
    Ok(result.rows_affected() > 0)
  }

  async fn mark_sent(&self, job_id: &str, sent_at: DateTime<Utc>) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE scheduled_jobs
      SET state = ?, sent_at = ?
      WHERE job_id = ? AND state IN (?, ?)
      "#,
    )
    .bind(JobState::Sent)
    .bind(sent_at.timestamp_millis())
    .bind(job_id)
    .bind(JobState::Pending)
    .bind(JobState::InFlight)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      let job = self.fetch(job_id).await?;
      debug!(job_id, state = %job.state, "mark_sent ignored for terminal job");
    }
    Ok(())
  }

  async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE scheduled_jobs
      SET state = ?, error = ?
      WHERE job_id = ? AND state IN (?, ?)
      "#,
    )
    .bind(JobState::Failed)
    .bind(reason)
    .bind(job_id)
    .bind(JobState::Pending)
    .bind(JobState::InFlight)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      let job = self.fetch(job_id).await?;
      debug!(job_id, state = %job.state, "mark_failed ignored for terminal job");
    }
    Ok(())
  }

  async fn cancel(&self, job_id: &str) -> Result<ScheduledJob, Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
      r#"
      UPDATE scheduled_jobs
      SET state = ?
      WHERE job_id = ? AND state = ?
      RETURNING {}
      "#,
      JOB_COLUMNS
    ))
    .bind(JobState::Cancelled)
    .bind(job_id)
    .bind(JobState::Pending)
    .fetch_optional(&self.pool)
    .await?;

    if let Some(row) = row {
      return row.try_into();
    }

    let job = self.fetch(job_id).await?;
    match job.state {
      JobState::Cancelled => Ok(job),
      state => Err(Error::InvalidState {
        job_id: job_id.to_string(),
        state,
      }),
    }
  }

  async fn cancel_batch(&self, batch_id: &str) -> Result<u64, Error> {
    let result =
      sqlx::query("UPDATE scheduled_jobs SET state = ? WHERE batch_id = ? AND state = ?")
        .bind(JobState::Cancelled)
        .bind(batch_id)
        .bind(JobState::Pending)
        .execute(&self.pool)
        .await?;

    Ok(result.rows_affected())
  }

  async fn list(&self, state: JobState) -> Result<Vec<ScheduledJob>, Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
      "SELECT {} FROM scheduled_jobs WHERE state = ? ORDER BY send_at ASC, seq ASC",
      JOB_COLUMNS
    ))
    .bind(state)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(ScheduledJob::try_from).collect()
  }

  async fn list_batch(&self, batch_id: &str) -> Result<Vec<ScheduledJob>, Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
      "SELECT {} FROM scheduled_jobs WHERE batch_id = ? ORDER BY seq ASC",
      JOB_COLUMNS
    ))
    .bind(batch_id)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(ScheduledJob::try_from).collect()
  }

  async fn recover_interrupted(
    &self,
    reason: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<u64, Error> {
    let result = sqlx::query(
      "UPDATE scheduled_jobs SET state = ?, error = ? WHERE state = ? AND claimed_at < ?",
    )
    .bind(JobState::Failed)
    .bind(reason)
    .bind(JobState::InFlight)
    .bind(claimed_before.timestamp_millis())
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }
}
