//! Drip Engine
//!
//! This crate ties the workflow compiler, the job store and the mail
//! transport together.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - schedule_workflow(id, recipient, start) → receipt        │
//! │  - load → validate → compile → create_batch                 │
//! │  - cancel_job / cancel_batch / list_* pass-throughs         │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ writes Pending jobs
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        JobStore                             │
//! └─────────────────────────────────────────────────────────────┘
//!                               ▲ find_due / claim / mark_*
//!                               │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        JobWorker                            │
//! │  - run(cancel) polls on a fixed interval                    │
//! │  - poll_once(now) sends due jobs on a bounded pool          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                         MailTransport
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use drip_engine::{FsWorkflowSource, JobWorker, Scheduler, WorkerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(SqliteStore::connect("drip.db").await?);
//! let scheduler = Scheduler::new(store.clone(), FsWorkflowSource::new("workflows"));
//! let receipt = scheduler
//!     .schedule_workflow("welcome", "lead@example.com", Utc::now())
//!     .await?;
//!
//! let worker = JobWorker::new(store, Arc::new(LogTransport::new()), WorkerConfig::default());
//! worker.run(CancellationToken::new()).await?;
//! ```

mod error;
mod events;
mod scheduler;
mod source;
mod worker;

pub use error::{ScheduleError, SourceError, WorkerError};
pub use events::{ChannelNotifier, JobEvent, JobNotifier, NoopNotifier};
pub use scheduler::{ScheduleReceipt, Scheduler};
pub use source::{FsWorkflowSource, WorkflowSource};
pub use worker::{JobWorker, PollReport, WorkerConfig};
