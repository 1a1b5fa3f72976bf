//! Local multi-queue executor.
//!
//! Runs jobs as local processes through three queues:
//! - `single`: one job at a time, in submission order;
//! - `multi`: up to `multi_cores` jobs at once, in submission order;
//! - `unlimited`: every job starts immediately.
//!
//! [`LocalScheduler`] implements the same [`batchbridge_core::Scheduler`]
//! interface as the remote dialects.

pub mod config;
pub mod job;
pub mod queue;
pub mod scheduler;

pub use config::LocalConfig;
pub use job::LocalState;
pub use queue::QueueKind;
pub use scheduler::{LocalScheduler, NAME};
