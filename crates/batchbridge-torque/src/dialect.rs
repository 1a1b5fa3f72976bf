//! The Torque [`Dialect`].

use batchbridge_core::{
    CancelOutcome, Classified, CommandLine, Dialect, JobDescription, Result, SchedulerError,
    ServerInfo, Submission,
};
use batchbridge_parsers::{CommandError, CommandOutput, ParseError, Record, Records};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::script::RESOURCES;
use crate::{qstat, script};

pub const NAME: &str = "torque";

const SUPPORTED_MAJORS: &[&str] = &["2.", "3.", "4.", "5.", "6.", "7."];

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Version:\s*(\S+)").expect("valid regex"));

/// `123.server.domain`, or `123[].server` for array jobs.
static JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d+(?:\[\])?(?:\.\S+)?)\s*$").expect("valid regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct Torque;

impl Dialect for Torque {
    fn name(&self) -> &'static str {
        NAME
    }

    fn job_options(&self) -> &'static [&'static str] {
        &[RESOURCES]
    }

    fn probe_command(&self) -> CommandLine {
        CommandLine::new("qstat").arg("--version")
    }

    fn check_server(&self, output: &CommandOutput, ignore_version: bool) -> Result<ServerInfo> {
        // Older releases print the version on stderr.
        let text = format!("{}\n{}", output.stdout, output.stderr);
        let version = VERSION
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|v| v.as_str().to_string());

        match version.as_deref() {
            Some(v) if SUPPORTED_MAJORS.iter().any(|major| v.starts_with(major)) => {}
            None if !output.success() => {
                return Err(SchedulerError::command(
                    NAME,
                    CommandError::Failed {
                        command: self.probe_command().to_string(),
                        exit_code: output.exit_code,
                        stdout: output.stdout.clone(),
                        stderr: output.stderr.clone(),
                    },
                ));
            }
            other if ignore_version => {
                tracing::warn!("Ignoring unrecognised Torque version {:?}", other);
            }
            other => {
                return Err(SchedulerError::incompatible(
                    NAME,
                    format!("unsupported Torque version {other:?}"),
                ));
            }
        }

        Ok(ServerInfo {
            version,
            accounting: false,
        })
    }

    fn generate_script(&self, desc: &JobDescription, entry: &Utf8Path) -> String {
        script::generate(desc, entry)
    }

    fn submit_command(&self, submission: Submission) -> CommandLine {
        match submission {
            Submission::Generated(script) => CommandLine::new("qsub").stdin(script),
            Submission::Existing(path) => CommandLine::new("qsub").arg(path.as_str()),
        }
    }

    fn parse_submit(&self, stdout: &str) -> std::result::Result<String, ParseError> {
        JOB_ID
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| ParseError::new("qsub did not report a job id", stdout.trim()))
    }

    fn cancel_command(&self, id: &str) -> CommandLine {
        CommandLine::new("qdel").arg(id)
    }

    fn parse_cancel(&self, output: &CommandOutput) -> Option<CancelOutcome> {
        let stderr = output.stderr.trim();
        if stderr.contains("Unknown Job Id") || stderr.contains("invalid state for job - COMPLETE")
        {
            Some(CancelOutcome::AlreadyFinished)
        } else if output.success() && stderr.is_empty() {
            Some(CancelOutcome::Terminating)
        } else {
            None
        }
    }

    fn listing_command(&self, queues: &[String], _server: &ServerInfo) -> CommandLine {
        qstat::jobs_command(queues)
    }

    fn parse_listing(&self, stdout: &str, _ignore_version: bool) -> Result<Records> {
        qstat::parse_jobs(stdout).map_err(|e| SchedulerError::parse(NAME, "qstat -x output", e))
    }

    fn classify_listed(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        qstat::classify(record)
    }

    fn classify_accounting(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        qstat::classify(record)
    }

    fn queues_command(&self) -> CommandLine {
        qstat::queues_command()
    }

    fn has_default_queue(&self) -> bool {
        false
    }

    fn parse_queues(&self, stdout: &str) -> std::result::Result<Records, ParseError> {
        qstat::parse_queues(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_core::{ConnectionConfig, JobFailure, JobHandle, Scheduler, SchedulerConnection};
    use batchbridge_parsers::ScriptedRunner;
    use std::sync::Arc;

    fn job(id: &str, state: &str, exit: Option<i32>) -> String {
        let exit = exit
            .map(|code| format!("<exit_status>{code}</exit_status>"))
            .unwrap_or_default();
        format!("<Job><Job_Id>{id}</Job_Id><job_state>{state}</job_state>{exit}</Job>")
    }

    fn listing(jobs: &[String]) -> CommandOutput {
        CommandOutput::ok(format!("<Data>{}</Data>\n", jobs.concat()))
    }

    fn runner() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond("qstat --version", CommandOutput::ok("Version: 6.1.2\nCommit: 661e092\n"))
            .respond("pwd", CommandOutput::ok("/home/alice\n"))
            .respond("qsub", CommandOutput::ok("101.head.cluster\n"))
            .respond("qstat -x", CommandOutput::ok(""));
        runner
    }

    async fn connect(runner: &Arc<ScriptedRunner>) -> SchedulerConnection<Torque> {
        SchedulerConnection::connect(Torque, runner.clone(), ConnectionConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_check_server() {
        let info = Torque
            .check_server(&CommandOutput::new(0, "", "Version: 4.2.10\n"), false)
            .unwrap();
        assert_eq!(info.version.as_deref(), Some("4.2.10"));
        assert!(!info.accounting);

        let pbspro = CommandOutput::ok("pbs_version = 19.1.3\n");
        assert!(matches!(
            Torque.check_server(&pbspro, false),
            Err(SchedulerError::IncompatibleServerVersion { .. })
        ));
    }

    #[test]
    fn test_parse_submit() {
        assert_eq!(Torque.parse_submit("42.head\n").unwrap(), "42.head");
        assert_eq!(Torque.parse_submit("43[].head\n").unwrap(), "43[].head");
        assert!(Torque.parse_submit("qsub: submit error (Bad UID)\n").is_err());
    }

    #[test]
    fn test_parse_cancel() {
        assert_eq!(
            Torque.parse_cancel(&CommandOutput::ok("")),
            Some(CancelOutcome::Terminating)
        );
        let unknown = CommandOutput::new(153, "", "qdel: Unknown Job Id 7.head\n");
        assert_eq!(
            Torque.parse_cancel(&unknown),
            Some(CancelOutcome::AlreadyFinished)
        );
    }

    #[tokio::test]
    async fn test_completed_job_from_listing() {
        let runner = runner();
        let conn = connect(&runner).await;
        let handle = conn
            .submit(&batchbridge_core::JobDescription::new("/bin/true"))
            .await
            .unwrap();
        assert_eq!(handle.id(), "101.head.cluster");

        runner.clear("qstat -x");
        runner
            .respond("qstat -x", listing(&[job("101.head.cluster", "R", None)]))
            .respond(
                "qstat -x",
                listing(&[job("101.head.cluster", "C", Some(0))]),
            );
        assert!(conn.get_job_status(&handle).await.unwrap().running);
        let status = conn.get_job_status(&handle).await.unwrap();
        assert!(status.succeeded());
        assert_eq!(status.state, "C");
    }

    #[tokio::test]
    async fn test_killed_job() {
        let runner = runner();
        runner.clear("qstat -x");
        runner.respond("qstat -x", listing(&[job("7.head", "C", Some(265))]));
        let conn = connect(&runner).await;
        let handle = JobHandle::new("7.head", NAME, conn.id(), None);
        let status = conn.get_job_status(&handle).await.unwrap();
        assert_eq!(
            status.failure,
            Some(JobFailure::canceled("killed by signal 9"))
        );
    }

    #[tokio::test]
    async fn test_cancel_before_listed() {
        let runner = runner();
        runner.respond("qdel", CommandOutput::ok(""));
        let conn = connect(&runner).await;
        let handle = conn
            .submit(&batchbridge_core::JobDescription::new("/bin/true"))
            .await
            .unwrap();

        let status = conn.cancel(&handle).await.unwrap();
        assert!(status.done);
        let status = conn.get_job_status(&handle).await.unwrap();
        assert!(status.failure.unwrap().is_canceled());
        assert!(conn.get_job_status(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_before_listed_then_completed_record() {
        let runner = runner();
        runner.respond("qdel", CommandOutput::ok(""));
        let conn = connect(&runner).await;
        let handle = conn
            .submit(&batchbridge_core::JobDescription::new("/bin/true"))
            .await
            .unwrap();

        runner.clear("qstat -x");
        let completed = listing(&[job("101.head.cluster", "C", Some(0))]);
        runner
            .respond("qstat -x", completed.clone())
            .respond("qstat -x", completed)
            .respond("qstat -x", CommandOutput::ok(""));

        let status = conn.cancel(&handle).await.unwrap();
        assert!(status.done);
        assert_eq!(status.state, "C");
        assert_eq!(
            status.failure,
            Some(JobFailure::canceled("deleted while pending"))
        );

        // The record still reads the same on the next poll.
        let again = conn.get_job_status(&handle).await.unwrap();
        assert_eq!(again.state, status.state);
        assert_eq!(again.failure, status.failure);

        // Once qstat forgets the job it is gone, not reported a second way.
        let err = conn.get_job_status(&handle).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchJob { .. }));
    }

    #[tokio::test]
    async fn test_queue_status() {
        let runner = runner();
        runner.respond(
            "qstat -Q -f -1",
            CommandOutput::ok("Queue: batch\n    queue_type = Execution\n    enabled = True\n"),
        );
        let conn = connect(&runner).await;
        let statuses = conn
            .get_queue_statuses(&["batch".to_string(), "gpu".to_string()])
            .await
            .unwrap();
        assert_eq!(statuses[0].info["enabled"], "True");
        assert!(statuses[0].error.is_none());
        assert!(matches!(
            statuses[1].error,
            Some(SchedulerError::NoSuchQueue { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_default_queue_without_query() {
        let runner = runner();
        let conn = connect(&runner).await;
        assert_eq!(conn.get_default_queue_name().await.unwrap(), None);
        assert_eq!(runner.count("qstat -Q"), 0);
    }
}
