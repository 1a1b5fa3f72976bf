//! One locally executed job: its state machine and its process.

use batchbridge_core::path::{resolve, working_directory};
use batchbridge_core::{JOB_ID_PLACEHOLDER, JobDescription, JobFailure, JobStatus};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::queue::QueueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalState {
    /// Submitted, waiting for a worker.
    Initial,
    /// Preparing the working directory and redirections.
    Staging,
    /// About to start the process.
    Scheduled,
    Running,
    /// The process exited on its own.
    Done,
    /// Could not start, was killed or ran out of time.
    Error,
}

impl LocalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Staging => "STAGING",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Initial | Self::Staging | Self::Scheduled)
    }
}

impl fmt::Display for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: LocalState,
    pub exit_code: Option<i32>,
    pub failure: Option<JobFailure>,
}

impl Outcome {
    pub fn failed(failure: JobFailure) -> Self {
        Self {
            state: LocalState::Error,
            exit_code: None,
            failure: Some(failure),
        }
    }

    fn exited(status: io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => match status.code() {
                Some(0) => Self {
                    state: LocalState::Done,
                    exit_code: Some(0),
                    failure: None,
                },
                Some(code) => Self {
                    state: LocalState::Done,
                    exit_code: Some(code),
                    failure: Some(JobFailure::error(format!("job exited with code {code}"))),
                },
                None => Self::failed(JobFailure::canceled("terminated by a signal")),
            },
            Err(e) => Self::failed(JobFailure::error(format!("waiting for the process failed: {e}"))),
        }
    }
}

/// Everything the executor tracks for one job.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub id: String,
    pub queue: QueueKind,
    pub description: JobDescription,
    pub state: LocalState,
    pub exit_code: Option<i32>,
    pub failure: Option<JobFailure>,
    pub submitted: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub token: CancellationToken,
    pub done: watch::Sender<bool>,
}

impl JobEntry {
    pub fn new(
        id: impl Into<String>,
        queue: QueueKind,
        description: JobDescription,
        token: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            description,
            state: LocalState::Initial,
            exit_code: None,
            failure: None,
            submitted: Utc::now(),
            started: None,
            finished: None,
            token,
            done: watch::channel(false).0,
        }
    }

    pub fn advance(&mut self, state: LocalState) {
        if state == LocalState::Running {
            self.started = Some(Utc::now());
        }
        self.state = state;
    }

    pub fn finish(&mut self, outcome: Outcome) {
        self.state = outcome.state;
        self.exit_code = outcome.exit_code;
        self.failure = outcome.failure;
        self.finished = Some(Utc::now());
        self.done.send_replace(true);
    }

    pub fn status(&self) -> JobStatus {
        let state = self.state.as_str();
        let status = if self.state.is_finished() {
            JobStatus::finished(&self.id, state, self.exit_code, self.failure.clone())
        } else if self.state == LocalState::Running {
            JobStatus::running(&self.id, state)
        } else {
            JobStatus::pending(&self.id, state)
        };

        let mut info = BTreeMap::new();
        info.insert("queue".to_string(), self.queue.to_string());
        info.insert("submitted".to_string(), self.submitted.to_rfc3339());
        if let Some(started) = self.started {
            info.insert("started".to_string(), started.to_rfc3339());
        }
        if let Some(finished) = self.finished {
            info.insert("finished".to_string(), finished.to_rfc3339());
        }
        status.with_info(info)
    }
}

fn redirect_path(id: &str, dir: &Utf8Path, path: &str) -> Utf8PathBuf {
    resolve(dir, &path.replace(JOB_ID_PLACEHOLDER, id))
}

async fn output(id: &str, dir: &Utf8Path, path: Option<&str>) -> io::Result<Stdio> {
    Ok(match path {
        Some(path) => Stdio::from(File::create(redirect_path(id, dir, path)).await?.into_std().await),
        None => Stdio::null(),
    })
}

/// Build the process for `desc`, opening its redirections.
pub(crate) async fn stage(id: &str, desc: &JobDescription, entry: &Utf8Path) -> io::Result<Command> {
    let dir = working_directory(entry, desc.working_directory.as_deref());

    let mut command = match desc.custom_script() {
        Some(script) => {
            let mut command = Command::new("/bin/sh");
            command.arg(resolve(&dir, script).as_str());
            command
        }
        None => {
            let mut command = Command::new(desc.executable.as_deref().unwrap_or_default());
            command.args(&desc.arguments);
            command
        }
    };

    let stdin = match &desc.stdin {
        Some(path) => Stdio::from(File::open(resolve(&dir, path)).await?.into_std().await),
        None => Stdio::null(),
    };
    command
        .envs(&desc.environment)
        .current_dir(&dir)
        .stdin(stdin)
        .stdout(output(id, &dir, desc.stdout.as_deref()).await?)
        .stderr(output(id, &dir, desc.stderr.as_deref()).await?)
        .kill_on_drop(true);
    Ok(command)
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill local process {:?}: {}", child.id(), e);
    }
}

/// Wait for `child`, killing it when `token` is cancelled or `max_runtime`
/// passes.
pub(crate) async fn supervise(
    mut child: Child,
    max_runtime: Option<Duration>,
    token: &CancellationToken,
) -> Outcome {
    let deadline = async {
        match max_runtime {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = child.wait() => Outcome::exited(status),
        _ = token.cancelled() => {
            // It may have exited just before the kill request.
            if let Ok(Some(status)) = child.try_wait() {
                return Outcome::exited(Ok(status));
            }
            kill(&mut child).await;
            Outcome::failed(JobFailure::canceled("killed by user"))
        }
        _ = deadline => {
            kill(&mut child).await;
            let minutes = max_runtime.map_or(0, |limit| limit.as_secs() / 60);
            Outcome::failed(JobFailure::error(format!(
                "exceeded max runtime of {minutes} minutes"
            )))
        }
    }
}
