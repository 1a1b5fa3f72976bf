//! Error taxonomy shared by every scheduler connection.

use batchbridge_parsers::{CommandError, ParseError};
use thiserror::Error;

/// Errors surfaced to callers of a scheduler connection.
///
/// Every variant names the scheduler dialect that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("{scheduler}: invalid job description: {reason}")]
    InvalidJobDescription {
        scheduler: &'static str,
        reason: String,
    },

    #[error("{scheduler}: {source}")]
    CommandFailed {
        scheduler: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("{scheduler}: failed to parse {what}: {source}")]
    Parse {
        scheduler: &'static str,
        what: String,
        #[source]
        source: ParseError,
    },

    #[error("{scheduler}: no such job {job_id}")]
    NoSuchJob {
        scheduler: &'static str,
        job_id: String,
    },

    #[error("{scheduler}: no such queue {queue}")]
    NoSuchQueue {
        scheduler: &'static str,
        queue: String,
    },

    #[error("{scheduler}: incompatible server version: {detail}")]
    IncompatibleServerVersion {
        scheduler: &'static str,
        detail: String,
    },

    #[error("{scheduler}: job {job_id} was not submitted through this connection")]
    InvalidJobHandle {
        scheduler: &'static str,
        job_id: String,
    },

    #[error("{scheduler}: connection is closed")]
    Closed { scheduler: &'static str },
}

impl SchedulerError {
    pub fn invalid(scheduler: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidJobDescription {
            scheduler,
            reason: reason.into(),
        }
    }

    pub fn command(scheduler: &'static str, source: CommandError) -> Self {
        Self::CommandFailed { scheduler, source }
    }

    pub fn parse(scheduler: &'static str, what: impl Into<String>, source: ParseError) -> Self {
        Self::Parse {
            scheduler,
            what: what.into(),
            source,
        }
    }

    pub fn no_such_job(scheduler: &'static str, job_id: impl Into<String>) -> Self {
        Self::NoSuchJob {
            scheduler,
            job_id: job_id.into(),
        }
    }

    pub fn no_such_queue(scheduler: &'static str, queue: impl Into<String>) -> Self {
        Self::NoSuchQueue {
            scheduler,
            queue: queue.into(),
        }
    }

    pub fn incompatible(scheduler: &'static str, detail: impl Into<String>) -> Self {
        Self::IncompatibleServerVersion {
            scheduler,
            detail: detail.into(),
        }
    }

    /// Name of the dialect that raised the error.
    pub fn scheduler(&self) -> &'static str {
        match self {
            Self::InvalidJobDescription { scheduler, .. }
            | Self::CommandFailed { scheduler, .. }
            | Self::Parse { scheduler, .. }
            | Self::NoSuchJob { scheduler, .. }
            | Self::NoSuchQueue { scheduler, .. }
            | Self::IncompatibleServerVersion { scheduler, .. }
            | Self::InvalidJobHandle { scheduler, .. }
            | Self::Closed { scheduler } => scheduler,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
