//! Job lifecycle engine shared by every batch scheduler dialect.
//!
//! A [`SchedulerConnection`] combines a [`Dialect`] (how to talk to one
//! scheduler) with a [`batchbridge_parsers::CommandRunner`] (where commands
//! run), and reconciles the scheduler's live listing, accounting store and
//! its own bookkeeping into one [`JobStatus`] per job.

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod path;
pub mod reconcile;
pub mod scheduler;
pub mod script;
pub mod types;
pub mod validate;

pub use config::{ConnectionConfig, DEFAULT_POLL_DELAY};
pub use connection::{DELETED_STATE, SchedulerConnection};
pub use dialect::{
    CancelOutcome, Classified, CommandLine, Dialect, JobState, ServerInfo, Submission,
};
pub use error::{Result, SchedulerError};
pub use reconcile::Reconciler;
pub use scheduler::Scheduler;
pub use script::{ScriptWriter, output_path};
pub use types::{
    CUSTOM_SCRIPT_OPTION, JOB_ID_PLACEHOLDER, JobDescription, JobFailure, JobHandle, JobStatus,
    QueueStatus, UNKNOWN_STATE,
};
pub use validate::{Rules, verify};
