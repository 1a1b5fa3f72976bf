//! Per-scheduler capability bundle.
//!
//! A dialect knows how to build each scheduler command and how to read its
//! output, but never runs anything itself. [`crate::SchedulerConnection`]
//! drives a dialect against a [`batchbridge_parsers::CommandRunner`].

use batchbridge_parsers::{CommandOutput, ParseError, Record, Records};
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;

use crate::config::DEFAULT_POLL_DELAY;
use crate::error::Result;
use crate::types::{JobDescription, JobFailure};

/// A scheduler command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&batchbridge_parsers::command_line(&self.program, &self.args))
    }
}

/// What the connect-time probe learned about the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: Option<String>,
    /// Whether the accounting store can be queried.
    pub accounting: bool,
}

/// What to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Script text generated from the description, fed on stdin.
    Generated(String),
    /// An existing script on the scheduler host.
    Existing(Utf8PathBuf),
}

/// A job's state as read from one status source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    /// Terminal record.
    Finished {
        exit_code: Option<i32>,
        failure: Option<JobFailure>,
    },
    /// The scheduler put the job into an error state; the connection deletes
    /// it and reports it failed.
    Error { detail: String },
}

/// A classified record: the native state string and what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub native: String,
    pub state: JobState,
}

impl Classified {
    pub fn new(native: impl Into<String>, state: JobState) -> Self {
        Self {
            native: native.into(),
            state,
        }
    }
}

/// How the scheduler answered a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job existed and is being killed.
    Terminating,
    /// The job was removed before it started.
    DeletedWhilePending,
    /// Nothing to do: the job already finished or is unknown.
    AlreadyFinished,
}

/// Command builders, parsers and classifiers for one scheduler.
pub trait Dialect: Send + Sync + 'static {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Accepted job option keys, besides the custom script option.
    fn job_options(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether a missing max runtime falls back to a scheduler default.
    fn has_default_runtime(&self) -> bool {
        true
    }

    /// Dialect rules layered on top of the shared validation.
    fn validate(&self, _desc: &JobDescription) -> std::result::Result<(), String> {
        Ok(())
    }

    fn poll_delay(&self) -> Duration {
        DEFAULT_POLL_DELAY
    }

    /// Command run once at connect time to identify the server.
    fn probe_command(&self) -> CommandLine;

    /// Interpret the probe output.
    fn check_server(&self, output: &CommandOutput, ignore_version: bool) -> Result<ServerInfo>;

    /// Build the submission script. Pure; identical input gives identical
    /// text.
    fn generate_script(&self, desc: &JobDescription, entry: &Utf8Path) -> String;

    fn submit_command(&self, submission: Submission) -> CommandLine;

    /// Extract the new job's identifier from the submit command's stdout.
    fn parse_submit(&self, stdout: &str) -> std::result::Result<String, ParseError>;

    fn cancel_command(&self, id: &str) -> CommandLine;

    /// Interpret the cancel command's output; `None` if it failed.
    fn parse_cancel(&self, output: &CommandOutput) -> Option<CancelOutcome>;

    /// Live listing, optionally restricted to some queues.
    fn listing_command(&self, queues: &[String], server: &ServerInfo) -> CommandLine;

    fn parse_listing(&self, stdout: &str, ignore_version: bool) -> Result<Records>;

    fn classify_listed(&self, record: &Record) -> std::result::Result<Classified, ParseError>;

    /// Whether one accounting command can cover several jobs.
    fn batch_accounting(&self, _server: &ServerInfo) -> bool {
        false
    }

    /// Accounting query for `ids`, or `None` when the server has no
    /// accounting store.
    fn accounting_command(&self, _ids: &[&str], _server: &ServerInfo) -> Option<CommandLine> {
        None
    }

    /// Whether a failed accounting command just means "no such job".
    fn accounting_missing(&self, _output: &CommandOutput) -> bool {
        false
    }

    fn parse_accounting(
        &self,
        _stdout: &str,
        _server: &ServerInfo,
    ) -> std::result::Result<Records, ParseError> {
        Ok(Records::new())
    }

    fn classify_accounting(&self, record: &Record) -> std::result::Result<Classified, ParseError>;

    /// Queue summary command.
    fn queues_command(&self) -> CommandLine;

    /// Queue records keyed by queue name.
    fn parse_queues(&self, stdout: &str) -> std::result::Result<Records, ParseError>;

    /// Command listing only the queue names; defaults to the summary.
    fn queue_names_command(&self) -> CommandLine {
        self.queues_command()
    }

    fn parse_queue_names(&self, stdout: &str) -> std::result::Result<Vec<String>, ParseError> {
        Ok(self.parse_queues(stdout)?.into_keys().collect())
    }

    /// Whether the scheduler names a default queue at all. When it does not,
    /// no queue command runs to look for one.
    fn has_default_queue(&self) -> bool {
        true
    }

    fn default_queue(&self, _queues: &Records) -> Option<String> {
        None
    }
}
