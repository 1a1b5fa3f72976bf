//! The Slurm [`Dialect`].

use batchbridge_core::{
    CancelOutcome, Classified, CommandLine, Dialect, JobDescription, Result, SchedulerError,
    ServerInfo, Submission,
};
use batchbridge_parsers::{
    CommandError, CommandOutput, ParseError, Record, Records, Separator, parse_key_values,
};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{sacct, script, sinfo, squeue};

pub const NAME: &str = "slurm";

/// Slurm release series this dialect has been checked against.
const SUPPORTED_VERSIONS: &[&str] = &[
    "2.3.", "2.5.", "2.6.", "14.03.", "14.11.", "15.08.", "16.05.", "17.02.", "17.11.", "18.08.",
    "19.05.", "20.02.", "20.11.", "21.08.", "22.05.", "23.02.", "23.11.", "24.05.", "24.11.",
    "25.05.",
];

/// Lines of `scontrol show config` that are headers rather than settings.
const CONFIG_IGNORE: &[&str] = &[
    "Configuration data as of",
    "Slurmctld(",
    "Cgroup Support Configuration",
    "Account Gather",
    "MPI Plugins Configuration",
    "Node Features Configuration",
];

static SUBMITTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct Slurm;

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS
        .iter()
        .any(|prefix| version.starts_with(prefix))
}

impl Dialect for Slurm {
    fn name(&self) -> &'static str {
        NAME
    }

    fn probe_command(&self) -> CommandLine {
        CommandLine::new("scontrol").args(["show", "config"])
    }

    fn check_server(&self, output: &CommandOutput, ignore_version: bool) -> Result<ServerInfo> {
        if !output.success() {
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
        // Plugin sections print free-form lines between the settings.
        let settings: String = output
            .stdout
            .lines()
            .filter(|line| line.contains('='))
            .map(|line| format!("{line}\n"))
            .collect();
        let config = parse_key_values(&settings, Separator::Token("="), CONFIG_IGNORE)
            .map_err(|e| SchedulerError::parse(NAME, "scontrol show config", e))?;

        let version = config.get("SLURM_VERSION").cloned();
        match version.as_deref() {
            Some(v) if is_supported_version(v) => {}
            other if ignore_version => {
                tracing::warn!("Ignoring unrecognised Slurm version {:?}", other);
            }
            Some(v) => {
                return Err(SchedulerError::incompatible(
                    NAME,
                    format!("unsupported Slurm version {v}"),
                ));
            }
            None => {
                return Err(SchedulerError::incompatible(
                    NAME,
                    "scontrol show config does not report SLURM_VERSION",
                ));
            }
        }

        let accounting = config
            .get("AccountingStorageType")
            .is_some_and(|storage| storage != "accounting_storage/none");
        Ok(ServerInfo {
            version,
            accounting,
        })
    }

    fn generate_script(&self, desc: &JobDescription, entry: &Utf8Path) -> String {
        script::generate(desc, entry)
    }

    fn submit_command(&self, submission: Submission) -> CommandLine {
        match submission {
            Submission::Generated(script) => CommandLine::new("sbatch").stdin(script),
            Submission::Existing(path) => CommandLine::new("sbatch").arg(path.as_str()),
        }
    }

    fn parse_submit(&self, stdout: &str) -> std::result::Result<String, ParseError> {
        SUBMITTED
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| ParseError::new("sbatch did not report a job id", stdout.trim()))
    }

    fn cancel_command(&self, id: &str) -> CommandLine {
        CommandLine::new("scancel").arg(id)
    }

    fn parse_cancel(&self, output: &CommandOutput) -> Option<CancelOutcome> {
        let stderr = output.stderr.trim();
        if stderr.contains("already completing or completed") || stderr.contains("Invalid job id")
        {
            Some(CancelOutcome::AlreadyFinished)
        } else if output.success() && stderr.is_empty() {
            Some(CancelOutcome::Terminating)
        } else {
            None
        }
    }

    fn listing_command(&self, queues: &[String], server: &ServerInfo) -> CommandLine {
        squeue::command(queues, squeue::filters_own_jobs(server.version.as_deref()))
    }

    fn parse_listing(&self, stdout: &str, _ignore_version: bool) -> Result<Records> {
        squeue::parse(stdout).map_err(|e| SchedulerError::parse(NAME, "squeue output", e))
    }

    fn classify_listed(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        squeue::classify(record)
    }

    fn batch_accounting(&self, server: &ServerInfo) -> bool {
        server.accounting
    }

    fn accounting_command(&self, ids: &[&str], server: &ServerInfo) -> Option<CommandLine> {
        if server.accounting {
            Some(sacct::sacct_command(ids))
        } else {
            ids.first().map(|id| sacct::scontrol_command(id))
        }
    }

    fn accounting_missing(&self, output: &CommandOutput) -> bool {
        sacct::is_missing(output)
    }

    fn parse_accounting(
        &self,
        stdout: &str,
        server: &ServerInfo,
    ) -> std::result::Result<Records, ParseError> {
        if server.accounting {
            sacct::parse_sacct(stdout)
        } else {
            sacct::parse_scontrol(stdout)
        }
    }

    fn classify_accounting(&self, record: &Record) -> std::result::Result<Classified, ParseError> {
        sacct::classify(record)
    }

    fn queues_command(&self) -> CommandLine {
        sinfo::command()
    }

    fn parse_queues(&self, stdout: &str) -> std::result::Result<Records, ParseError> {
        sinfo::parse(stdout)
    }

    fn default_queue(&self, queues: &Records) -> Option<String> {
        sinfo::default_partition(queues)
    }
}
