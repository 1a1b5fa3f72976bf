//! Canonical job and queue model shared by all dialects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SchedulerError;

/// Job option naming an existing script to submit instead of a generated one.
pub const CUSTOM_SCRIPT_OPTION: &str = "job.script";

/// Placeholder in stdout/stderr paths replaced by the scheduler's job id.
pub const JOB_ID_PLACEHOLDER: &str = "{JOB_ID}";

/// Portable description of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDescription {
    pub name: Option<String>,
    /// Program to run. May be absent only when a custom script is given.
    pub executable: Option<String>,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Working directory, relative to the connection's entry directory
    /// unless absolute.
    pub working_directory: Option<String>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub queue: Option<String>,
    pub node_count: u32,
    pub processes_per_node: u32,
    pub threads_per_process: Option<u32>,
    /// Wall time in minutes; `None` uses the scheduler default.
    pub max_runtime: Option<u32>,
    /// Memory limit in megabytes.
    pub max_memory: Option<u64>,
    pub interactive: bool,
    pub start_single_process: bool,
    /// Dialect-specific options, checked against the dialect's whitelist.
    pub job_options: BTreeMap<String, String>,
    /// Extra scheduler arguments, one directive line each.
    pub scheduler_arguments: Vec<String>,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            name: None,
            executable: None,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            stdin: None,
            stdout: None,
            stderr: None,
            queue: None,
            node_count: 1,
            processes_per_node: 1,
            threads_per_process: None,
            max_runtime: None,
            max_memory: None,
            interactive: false,
            start_single_process: false,
            job_options: BTreeMap::new(),
            scheduler_arguments: Vec::new(),
        }
    }
}

impl JobDescription {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Self::default()
        }
    }

    pub fn custom_script(&self) -> Option<&str> {
        self.job_options.get(CUSTOM_SCRIPT_OPTION).map(String::as_str)
    }

    /// Total number of processes requested.
    pub fn total_processes(&self) -> u32 {
        self.node_count.saturating_mul(self.processes_per_node)
    }

    /// Whether the invocation needs a multi-process launcher.
    pub fn needs_launcher(&self) -> bool {
        self.total_processes() > 1 && !self.start_single_process
    }
}

/// A submitted job.
///
/// Handles are created by a connection at submission or listing time and
/// never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    id: String,
    scheduler: &'static str,
    scheduler_id: Uuid,
    description: Option<Arc<JobDescription>>,
}

impl JobHandle {
    pub fn new(
        id: impl Into<String>,
        scheduler: &'static str,
        scheduler_id: Uuid,
        description: Option<JobDescription>,
    ) -> Self {
        Self {
            id: id.into(),
            scheduler,
            scheduler_id,
            description: description.map(Arc::new),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scheduler(&self) -> &'static str {
        self.scheduler
    }

    /// Identifier of the connection that issued this handle.
    pub fn scheduler_id(&self) -> Uuid {
        self.scheduler_id
    }

    /// Copy of the description taken at submission, if this connection
    /// submitted the job.
    pub fn description(&self) -> Option<&JobDescription> {
        self.description.as_deref()
    }
}

/// Why a finished job did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The job was killed or deleted, by this connection or someone else.
    Canceled { reason: String },
    /// The job failed on its own or was put into an error state.
    Error { detail: String },
}

impl JobFailure {
    pub fn canceled(reason: impl Into<String>) -> Self {
        Self::Canceled {
            reason: reason.into(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// State string reported when a job was recently seen but is visible in no
/// source right now.
pub const UNKNOWN_STATE: &str = "UNKNOWN";

/// Canonical status snapshot of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    /// Native scheduler state, passed through for diagnostics.
    pub state: String,
    pub exit_code: Option<i32>,
    pub running: bool,
    pub done: bool,
    pub failure: Option<JobFailure>,
    /// Raw record the status was derived from.
    pub info: BTreeMap<String, String>,
}

impl JobStatus {
    pub fn pending(job_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: state.into(),
            exit_code: None,
            running: false,
            done: false,
            failure: None,
            info: BTreeMap::new(),
        }
    }

    pub fn running(job_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            running: true,
            ..Self::pending(job_id, state)
        }
    }

    pub fn finished(
        job_id: impl Into<String>,
        state: impl Into<String>,
        exit_code: Option<i32>,
        failure: Option<JobFailure>,
    ) -> Self {
        Self {
            exit_code,
            done: true,
            failure,
            ..Self::pending(job_id, state)
        }
    }

    /// Not visible anywhere yet, but seen recently enough to still exist.
    pub fn unknown_pending(job_id: impl Into<String>) -> Self {
        Self::pending(job_id, UNKNOWN_STATE)
    }

    pub fn with_info(mut self, info: BTreeMap<String, String>) -> Self {
        self.info = info;
        self
    }

    /// Done without a failure cause.
    pub fn succeeded(&self) -> bool {
        self.done && self.failure.is_none()
    }
}

/// Snapshot of one queue (partition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub scheduler_id: Uuid,
    #[serde(skip)]
    pub error: Option<SchedulerError>,
    pub info: BTreeMap<String, String>,
}

impl QueueStatus {
    pub fn new(name: impl Into<String>, scheduler_id: Uuid, info: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            scheduler_id,
            error: None,
            info,
        }
    }

    pub fn failed(name: impl Into<String>, scheduler_id: Uuid, error: SchedulerError) -> Self {
        Self {
            name: name.into(),
            scheduler_id,
            error: Some(error),
            info: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_defaults() {
        let desc = JobDescription::new("/bin/echo");
        assert_eq!(desc.node_count, 1);
        assert_eq!(desc.processes_per_node, 1);
        assert_eq!(desc.max_runtime, None);
        assert!(!desc.needs_launcher());
        assert_eq!(desc.custom_script(), None);
    }

    #[test]
    fn test_description_deserializes_with_defaults() {
        let desc: JobDescription =
            serde_json::from_str(r#"{"executable": "/bin/true", "node_count": 2}"#).unwrap();
        assert_eq!(desc.node_count, 2);
        assert_eq!(desc.processes_per_node, 1);
        assert!(desc.needs_launcher());
    }

    #[test]
    fn test_handle_keeps_its_own_copy() {
        let mut desc = JobDescription::new("/bin/echo");
        let handle = JobHandle::new("1", "slurm", Uuid::new_v4(), Some(desc.clone()));
        desc.arguments.push("changed".to_string());
        assert!(handle.description().unwrap().arguments.is_empty());
    }

    #[test]
    fn test_status_constructors() {
        let status = JobStatus::running("1", "RUNNING");
        assert!(status.running && !status.done);

        let status = JobStatus::finished("1", "CANCELLED", Some(0), Some(JobFailure::canceled("x")));
        assert!(status.done && !status.running);
        assert!(!status.succeeded());

        let status = JobStatus::unknown_pending("1");
        assert_eq!(status.state, UNKNOWN_STATE);
        assert!(!status.running && !status.done && status.failure.is_none());
    }

    #[test]
    fn test_failure_serializes_tagged() {
        let json = serde_json::to_string(&JobFailure::canceled("deleted while pending")).unwrap();
        assert_eq!(json, r#"{"kind":"canceled","reason":"deleted while pending"}"#);
    }
}
