//! The Grid Engine [`Dialect`].

use batchbridge_core::{
    CancelOutcome, Classified, CommandLine, Dialect, JobDescription, Result, SchedulerError,
    ServerInfo, Submission,
};
use batchbridge_parsers::{CommandError, CommandOutput, ParseError, Record, Records};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::qstat::ListingProblem;
use crate::script::{PARALLEL_ENVIRONMENT, PARALLEL_SLOTS};
use crate::{qacct, qstat, script};

pub const NAME: &str = "gridengine";

/// First words of `qconf -help` for the Grid Engine families we parse.
const KNOWN_FAMILIES: &[&str] = &["GE", "SGE", "OGS/GE", "UGE"];

static SUBMITTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Your job (\d+) ").expect("valid regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct GridEngine;

impl Dialect for GridEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn job_options(&self) -> &'static [&'static str] {
        &[PARALLEL_ENVIRONMENT, PARALLEL_SLOTS]
    }

    fn has_default_runtime(&self) -> bool {
        false
    }

    fn validate(&self, desc: &JobDescription) -> std::result::Result<(), String> {
        let slots = script::slots(desc)?;
        if slots > 1 && !desc.job_options.contains_key(PARALLEL_ENVIRONMENT) {
            return Err(format!(
                "{PARALLEL_ENVIRONMENT} is required for jobs with {slots} slots"
            ));
        }
        Ok(())
    }

    fn probe_command(&self) -> CommandLine {
        CommandLine::new("qconf").arg("-help")
    }

    fn check_server(&self, output: &CommandOutput, ignore_version: bool) -> Result<ServerInfo> {
        let Some(first) = output.stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Err(SchedulerError::command(
                NAME,
                CommandError::Failed {
                    command: self.probe_command().to_string(),
                    exit_code: output.exit_code,
                    stdout: output.stdout.clone(),
                    stderr: output.stderr.clone(),
                },
            ));
        };

        let family = first.split_whitespace().next().unwrap_or_default();
        if !KNOWN_FAMILIES.contains(&family) {
            if !ignore_version {
                return Err(SchedulerError::incompatible(
                    NAME,
                    format!("unrecognised qconf version line {first:?}"),
                ));
            }
            tracing::warn!("Ignoring unrecognised Grid Engine version {:?}", first);
        }

        Ok(ServerInfo {
            version: Some(first.to_string()),
            accounting: true,
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
        SUBMITTED
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| ParseError::new("qsub did not report a job id", stdout.trim()))
    }

    fn cancel_command(&self, id: &str) -> CommandLine {
        CommandLine::new("qdel").arg(id)
    }

    fn parse_cancel(&self, output: &CommandOutput) -> Option<CancelOutcome> {
        let text = format!("{}\n{}", output.stdout, output.stderr);
        if text.contains("has registered the job") {
            Some(CancelOutcome::Terminating)
        } else if text.contains("has deleted job") {
            Some(CancelOutcome::DeletedWhilePending)
        } else if text.contains("does not exist") {
            Some(CancelOutcome::AlreadyFinished)
        } else {
            None
        }
    }

    fn listing_command(&self, queues: &[String], _server: &ServerInfo) -> CommandLine {
        qstat::jobs_command(queues)
    }

    fn parse_listing(&self, stdout: &str, ignore_version: bool) -> Result<Records> {
        qstat::parse_jobs(stdout, ignore_version).map_err(|problem| match problem {
            ListingProblem::Malformed(e) => SchedulerError::parse(NAME, "qstat -xml output", e),
            ListingProblem::Schema(schema) => SchedulerError::incompatible(
                NAME,
                format!("qstat schema {schema} is not {}", qstat::SCHEMA_REVISION),
            ),
        })
    }

    fn classify_listed(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        qstat::classify(record)
    }

    fn accounting_command(&self, ids: &[&str], server: &ServerInfo) -> Option<CommandLine> {
        if !server.accounting {
            return None;
        }
        ids.first().map(|id| qacct::command(id))
    }

    fn accounting_missing(&self, output: &CommandOutput) -> bool {
        qacct::is_missing(output)
    }

    fn parse_accounting(
        &self,
        stdout: &str,
        _server: &ServerInfo,
    ) -> std::result::Result<Records, ParseError> {
        qacct::parse(stdout)
    }

    fn classify_accounting(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        qacct::classify(record)
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

    fn queue_names_command(&self) -> CommandLine {
        CommandLine::new("qconf").arg("-sql")
    }

    fn parse_queue_names(&self, stdout: &str) -> std::result::Result<Vec<String>, ParseError> {
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_core::{ConnectionConfig, JobFailure, JobHandle, Scheduler, SchedulerConnection};
    use batchbridge_parsers::ScriptedRunner;
    use std::sync::Arc;

    const SCHEMA: &str = "http://gridengine.sunsource.net/source/browse/*checkout*/gridengine/source/dist/util/resources/schemas/qstat/qstat.xsd?revision=1.11";

    fn listing(jobs: &[(&str, &str)]) -> CommandOutput {
        let mut text = format!("<?xml version='1.0'?>\n<job_info xmlns:xsd=\"{SCHEMA}\">\n<queue_info>\n");
        for (id, state) in jobs {
            text.push_str(&format!(
                "<job_list><JB_job_number>{id}</JB_job_number><state>{state}</state></job_list>\n"
            ));
        }
        text.push_str("</queue_info>\n</job_info>\n");
        CommandOutput::ok(text)
    }

    fn runner() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond("qconf -help", CommandOutput::ok("SGE 8.1.9\n\nusage: qconf [options]\n"))
            .respond("pwd", CommandOutput::ok("/home/alice\n"))
            .respond(
                "qsub",
                CommandOutput::ok("Your job 583 (\"batchbridge\") has been submitted\n"),
            )
            .respond("qstat -xml", listing(&[]))
            .respond(
                "qacct",
                CommandOutput::new(1, "", "error: job id 583 not found\n"),
            );
        runner
    }

    async fn connect(runner: &Arc<ScriptedRunner>) -> SchedulerConnection<GridEngine> {
        SchedulerConnection::connect(GridEngine, runner.clone(), ConnectionConfig::default())
            .await
            .unwrap()
    }

    fn echo() -> JobDescription {
        JobDescription {
            arguments: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            max_runtime: Some(15),
            ..JobDescription::new("/bin/echo")
        }
    }

    #[test]
    fn test_check_server() {
        let info = GridEngine
            .check_server(&CommandOutput::ok("GE 6.2u5\n"), false)
            .unwrap();
        assert_eq!(info.version.as_deref(), Some("GE 6.2u5"));

        let err = GridEngine
            .check_server(&CommandOutput::ok("PBSPro 19.1\n"), false)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::IncompatibleServerVersion { .. }));
        assert!(GridEngine
            .check_server(&CommandOutput::ok("PBSPro 19.1\n"), true)
            .is_ok());
    }

    #[test]
    fn test_parse_cancel() {
        let registered = CommandOutput::ok("alice has registered the job 583 for deletion\n");
        assert_eq!(
            GridEngine.parse_cancel(&registered),
            Some(CancelOutcome::Terminating)
        );
        let deleted = CommandOutput::ok("alice has deleted job 584\n");
        assert_eq!(
            GridEngine.parse_cancel(&deleted),
            Some(CancelOutcome::DeletedWhilePending)
        );
        let gone = CommandOutput::new(1, "", "denied: job \"585\" does not exist\n");
        assert_eq!(
            GridEngine.parse_cancel(&gone),
            Some(CancelOutcome::AlreadyFinished)
        );
        assert_eq!(
            GridEngine.parse_cancel(&CommandOutput::new(1, "", "qdel: permission denied\n")),
            None
        );
    }

    #[test]
    fn test_validate_requires_parallel_environment() {
        let mut desc = echo();
        desc.processes_per_node = 4;
        assert!(GridEngine.validate(&desc).unwrap_err().contains(PARALLEL_ENVIRONMENT));
        desc.job_options
            .insert(PARALLEL_ENVIRONMENT.to_string(), "smp".to_string());
        assert!(GridEngine.validate(&desc).is_ok());
    }

    #[tokio::test]
    async fn test_runtime_is_required() {
        let runner = runner();
        let conn = connect(&runner).await;
        let desc = JobDescription::new("/bin/true");
        let err = conn.submit(&desc).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }));
        assert_eq!(runner.count("qsub"), 0);
    }

    #[tokio::test]
    async fn test_submit_and_run() {
        let runner = runner();
        let conn = connect(&runner).await;
        let job = conn.submit(&echo()).await.unwrap();
        assert_eq!(job.id(), "583");

        runner.clear("qstat -xml");
        runner.respond("qstat -xml", listing(&[("583", "r")]));
        let status = conn.get_job_status(&job).await.unwrap();
        assert!(status.running);
        assert_eq!(status.state, "r");
    }

    #[tokio::test]
    async fn test_finished_from_qacct() {
        let runner = runner();
        runner.clear("qacct");
        runner.respond(
            "qacct -j 583",
            CommandOutput::ok(
                "==============================================================\n\
                 qname        all.q\n\
                 jobnumber    583\n\
                 failed       0\n\
                 exit_status  0\n",
            ),
        );
        let conn = connect(&runner).await;
        let job = conn.submit(&echo()).await.unwrap();

        let status = conn.get_job_status(&job).await.unwrap();
        assert!(status.succeeded());
        assert_eq!(status.info["qname"], "all.q");
    }

    #[tokio::test]
    async fn test_qdel_of_pending_job_reported_once() {
        let runner = runner();
        runner.respond("qdel", CommandOutput::ok("alice has deleted job 583\n"));
        let conn = connect(&runner).await;
        let job = conn.submit(&echo()).await.unwrap();

        // Listed as pending, so only the qdel answer marks it deleted.
        runner.clear("qstat -xml");
        runner
            .respond("qstat -xml", listing(&[("583", "qw")]))
            .respond("qstat -xml", listing(&[]));
        assert!(!conn.get_job_status(&job).await.unwrap().done);

        let status = conn.cancel(&job).await.unwrap();
        assert!(status.failure.unwrap().is_canceled());

        let status = conn.get_job_status(&job).await.unwrap();
        assert!(status.done);
        assert!(status.failure.unwrap().is_canceled());

        let err = conn.get_job_status(&job).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchJob { .. }));
    }

    #[tokio::test]
    async fn test_error_state_deletes_job() {
        let runner = runner();
        runner.clear("qstat -xml");
        runner.respond("qstat -xml", listing(&[("585", "Eqw")]));
        runner.respond("qdel", CommandOutput::ok("alice has deleted job 585\n"));
        let conn = connect(&runner).await;
        let job = JobHandle::new("585", NAME, conn.id(), None);

        let status = conn.get_job_status(&job).await.unwrap();
        assert!(status.done);
        assert!(matches!(status.failure, Some(JobFailure::Error { .. })));
        assert_eq!(status.state, "Eqw");
        assert_eq!(runner.count("qdel 585"), 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal() {
        let runner = runner();
        runner.clear("qstat -xml");
        runner.respond(
            "qstat -xml",
            CommandOutput::ok("<job_info xmlns:xsd=\"http://example.org/qstat.xsd?revision=2.0\"/>"),
        );
        let conn = connect(&runner).await;
        let job = JobHandle::new("583", NAME, conn.id(), None);
        let err = conn.get_job_status(&job).await.unwrap_err();
        assert!(matches!(err, SchedulerError::IncompatibleServerVersion { .. }));
    }

    #[tokio::test]
    async fn test_queue_names() {
        let runner = runner();
        runner.respond("qconf -sql", CommandOutput::ok("all.q\nlong.q\n"));
        let conn = connect(&runner).await;
        assert_eq!(conn.get_queue_names().await.unwrap(), vec!["all.q", "long.q"]);
        assert_eq!(conn.get_default_queue_name().await.unwrap(), None);
        assert_eq!(runner.count("qstat -xml -g c"), 0);
    }
}
