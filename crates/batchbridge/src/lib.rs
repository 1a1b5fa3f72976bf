//! Submit, monitor and cancel batch jobs through one interface.
//!
//! [`connect`] returns a [`Scheduler`] for Slurm, Grid Engine, Torque or the
//! local executor. Remote schedulers are driven by running their command
//! line tools through a [`CommandRunner`], which may run them locally or
//! anywhere else.

pub mod connect;
pub mod kind;

pub use connect::{Config, connect, connect_any};
pub use kind::{SchedulerKind, detect_scheduler};

pub use batchbridge_core::{
    ConnectionConfig, JobDescription, JobFailure, JobHandle, JobStatus, QueueStatus, Result,
    Scheduler, SchedulerConnection, SchedulerError,
};
pub use batchbridge_local::LocalConfig;
pub use batchbridge_parsers::{CommandError, CommandOutput, CommandRunner, LocalCommandRunner};

pub use batchbridge_gridengine::GridEngine;
pub use batchbridge_local::LocalScheduler;
pub use batchbridge_slurm::Slurm;
pub use batchbridge_torque::Torque;

