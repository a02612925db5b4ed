use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drip_config::WorkflowDef;
use drip_engine::{FsWorkflowSource, JobWorker, Scheduler, WorkerConfig};
use drip_mail::{DEFAULT_FROM, LogTransport, MailTransport, OutboxTransport};
use drip_store::{JobState, SqliteStore};
use drip_workflow::Workflow;

/// Drip - schedules multi-step email campaigns from workflow graphs
#[derive(Parser)]
#[command(name = "drip")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.drip)
  #[arg(long, global = true, env = "DRIP_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Path to the job database (default: <data_dir>/drip.db)
  #[arg(long, global = true, env = "DRIP_DATABASE")]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a workflow file and print the emails it would schedule, without storing them
  Compile {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    #[arg(long)]
    recipient: String,

    /// Start time as RFC 3339 (default: now)
    #[arg(long, value_parser = parse_start)]
    start: Option<DateTime<Utc>>,
  },

  /// Schedule a stored workflow (<data_dir>/workflows/<id>.json) for a recipient
  Schedule {
    workflow_id: String,

    #[arg(long)]
    recipient: String,

    /// Start time as RFC 3339 (default: now)
    #[arg(long, value_parser = parse_start)]
    start: Option<DateTime<Utc>>,
  },

  /// Schedule a single email, outside any workflow
  Send {
    #[arg(long)]
    to: String,

    #[arg(long)]
    subject: String,

    #[arg(long, default_value = "")]
    body: String,

    /// Send time as RFC 3339 (default: now)
    #[arg(long, value_parser = parse_start)]
    at: Option<DateTime<Utc>>,
  },

  /// Cancel one pending job
  Cancel { job_id: String },

  /// Cancel every pending job created by one schedule call
  CancelBatch { batch_id: String },

  /// List jobs
  Jobs {
    #[arg(long, value_enum, default_value_t = StateFilter::Pending)]
    state: StateFilter,
  },

  /// Run the send worker until interrupted
  Worker {
    /// Append sent emails to this file instead of logging them
    #[arg(long)]
    outbox: Option<PathBuf>,

    /// Sender address
    #[arg(long, env = "DRIP_MAIL_FROM", default_value = DEFAULT_FROM)]
    from: String,

    #[arg(long, env = "DRIP_POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,

    #[arg(long, env = "DRIP_MAX_CONCURRENT_SENDS", default_value_t = 8)]
    max_concurrent_sends: usize,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum StateFilter {
  Pending,
  #[value(name = "in_flight")]
  InFlight,
  Sent,
  Failed,
  Cancelled,
  /// Pending jobs whose send time has passed
  Due,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".drip"),
  };
  let database = cli.database.unwrap_or_else(|| data_dir.join("drip.db"));

  let Some(command) = cli.command else {
    println!("drip - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Compile {
        workflow_file,
        recipient,
        start,
      } => compile(&workflow_file, &recipient, start.unwrap_or_else(Utc::now)).await,
      Commands::Schedule {
        workflow_id,
        recipient,
        start,
      } => {
        let scheduler = open_scheduler(&data_dir, &database).await?;
        let receipt = scheduler
          .schedule_workflow(&workflow_id, &recipient, start.unwrap_or_else(Utc::now))
          .await
          .with_context(|| format!("failed to schedule workflow '{}'", workflow_id))?;
        eprintln!(
          "Scheduled {} email(s) in batch {}",
          receipt.jobs_created, receipt.batch_id
        );
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        Ok(())
      }
      Commands::Send {
        to,
        subject,
        body,
        at,
      } => {
        let scheduler = open_scheduler(&data_dir, &database).await?;
        let job = scheduler
          .schedule_email(&to, &subject, &body, at.unwrap_or_else(Utc::now))
          .await
          .with_context(|| format!("failed to schedule email to '{}'", to))?;
        eprintln!("Scheduled email {} for {}", job.job_id, job.send_at);
        println!("{}", serde_json::to_string_pretty(&job)?);
        Ok(())
      }
      Commands::Cancel { job_id } => {
        let scheduler = open_scheduler(&data_dir, &database).await?;
        let job = scheduler
          .cancel_job(&job_id)
          .await
          .with_context(|| format!("failed to cancel job '{}'", job_id))?;
        println!("{}", serde_json::to_string_pretty(&job)?);
        Ok(())
      }
      Commands::CancelBatch { batch_id } => {
        let scheduler = open_scheduler(&data_dir, &database).await?;
        let cancelled = scheduler
          .cancel_batch(&batch_id)
          .await
          .with_context(|| format!("failed to cancel batch '{}'", batch_id))?;
        eprintln!("Cancelled {} job(s)", cancelled);
        Ok(())
      }
      Commands::Jobs { state } => {
        let scheduler = open_scheduler(&data_dir, &database).await?;
        let jobs = match state {
          StateFilter::Due => scheduler.list_due(Utc::now()).await,
          StateFilter::Pending => scheduler.list_pending().await,
          StateFilter::Sent => scheduler.list_sent().await,
          StateFilter::Failed => scheduler.list_failed().await,
          StateFilter::InFlight => scheduler.list(JobState::InFlight).await,
          StateFilter::Cancelled => scheduler.list(JobState::Cancelled).await,
        }
        .context("failed to list jobs")?;
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        Ok(())
      }
      Commands::Worker {
        outbox,
        from,
        poll_interval_secs,
        max_concurrent_sends,
      } => {
        let config = WorkerConfig {
          poll_interval: Duration::from_secs(poll_interval_secs),
          max_concurrent_sends,
          sender: from,
          ..WorkerConfig::default()
        };
        match outbox {
          Some(path) => {
            let transport = OutboxTransport::new(path);
            info!(path = %transport.path().display(), "appending sent emails to outbox");
            run_worker(&database, transport, config).await
          }
          None => run_worker(&database, LogTransport::new(), config).await,
        }
      }
    }
  })
}

async fn compile(workflow_file: &Path, recipient: &str, start: DateTime<Utc>) -> Result<()> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let workflow_def: WorkflowDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow = Workflow::from_def(workflow_def).context("invalid workflow")?;
  let drafts = drip_compiler::compile(&workflow, recipient, start).context("compilation failed")?;

  eprintln!("Compiled {} email(s)", drafts.len());
  println!("{}", serde_json::to_string_pretty(&drafts)?);
  Ok(())
}

async fn open_store(database: &Path) -> Result<Arc<SqliteStore>> {
  if let Some(parent) = database.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create directory: {}", parent.display()))?;
  }
  let store = SqliteStore::connect(database)
    .await
    .with_context(|| format!("failed to open job database: {}", database.display()))?;
  Ok(Arc::new(store))
}

async fn open_scheduler(
  data_dir: &Path,
  database: &Path,
) -> Result<Scheduler<SqliteStore, FsWorkflowSource>> {
  let store = open_store(database).await?;
  let source = FsWorkflowSource::new(data_dir.join("workflows"));
  Ok(Scheduler::new(store, source))
}

async fn run_worker<T: MailTransport + 'static>(
  database: &Path,
  transport: T,
  config: WorkerConfig,
) -> Result<()> {
  let store = open_store(database).await?;
  let worker = JobWorker::new(store, Arc::new(transport), config);

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    match tokio::signal::ctrl_c().await {
      Ok(()) => {
        info!("interrupt received, stopping after the current cycle");
        on_signal.cancel();
      }
      Err(e) => warn!(error = %e, "failed to listen for interrupt"),
    }
  });

  worker.run(cancel).await.context("worker failed")?;
  Ok(())
}

fn parse_start(value: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}
