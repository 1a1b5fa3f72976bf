//! Live job listing via squeue.

use batchbridge_core::{Classified, CommandLine};
use batchbridge_parsers::{ParseError, Record, Records, parse_table};

use crate::types::SlurmJobState;

/// squeue output format:
/// %i - Job ID
/// %P - Partition
/// %j - Job name
/// %u - User
/// %T - State (extended)
/// %M - Time used
/// %l - Time limit
/// %D - Node count
/// %R - Reason or node list
const SQUEUE_FORMAT: &str = "%i|%P|%j|%u|%T|%M|%l|%D|%R";

/// Field holding the job id.
pub const JOB_ID_FIELD: &str = "JOBID";

/// First release series whose squeue accepts `--me`.
const OWN_JOBS_SINCE: (u32, u32) = (20, 2);

/// Whether squeue of this Slurm version can restrict itself to the calling
/// user. Unknown versions are listed unfiltered.
pub fn filters_own_jobs(version: Option<&str>) -> bool {
    let mut series = version
        .unwrap_or_default()
        .split('.')
        .map(|part| part.parse::<u32>().ok());
    match (series.next().flatten(), series.next().flatten()) {
        (Some(major), Some(minor)) => (major, minor) >= OWN_JOBS_SINCE,
        _ => false,
    }
}

/// Live listing, optionally restricted to the calling user's jobs and to
/// some partitions.
pub fn command(partitions: &[String], own_jobs: bool) -> CommandLine {
    let mut command = CommandLine::new("squeue");
    if own_jobs {
        command = command.arg("--me");
    }
    let command = command.arg(format!("--format={SQUEUE_FORMAT}"));
    if partitions.is_empty() {
        command
    } else {
        command.arg(format!("--partition={}", partitions.join(",")))
    }
}

pub fn parse(stdout: &str) -> Result<Records, ParseError> {
    parse_table(stdout, "|", JOB_ID_FIELD)
}

pub fn classify(record: &Record) -> Result<Classified, ParseError> {
    let native = record
        .get("STATE")
        .ok_or_else(|| ParseError::new("squeue record without STATE", format!("{record:?}")))?;
    let state = SlurmJobState::parse(native).to_job_state(None)?;
    Ok(Classified::new(native.as_str(), state))
}
