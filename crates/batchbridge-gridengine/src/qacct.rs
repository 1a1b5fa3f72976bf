//! Finished job records via `qacct -j`.

use batchbridge_core::{Classified, CommandLine, JobFailure, JobState};
use batchbridge_parsers::{
    CommandOutput, ParseError, Record, Records, Separator, index_records, parse_exit_code,
    parse_keyed_blocks,
};

/// `failed` code qacct reports for jobs killed through qdel.
const FAILED_AFTER_JOB: i32 = 100;

pub fn command(id: &str) -> CommandLine {
    CommandLine::new("qacct").args(["-j", id])
}

/// Records keyed by `jobnumber`. A job that ran several times (restarts,
/// array tasks) keeps its last record.
pub fn parse(stdout: &str) -> Result<Records, ParseError> {
    let blocks = parse_keyed_blocks(stdout, Separator::Whitespace, "qname", &["==="])?;
    index_records(blocks, "jobnumber")
}

/// qacct reports `error: job id 42 not found` for unknown jobs.
pub fn is_missing(output: &CommandOutput) -> bool {
    output.stderr.contains("not found") || output.stdout.contains("not found")
}

/// The leading number of a qacct value such as `100 : assumedly after job`.
fn leading_number(record: &Record, field: &str) -> Result<Option<i32>, ParseError> {
    let value = record
        .get(field)
        .and_then(|v| v.split_whitespace().next());
    parse_exit_code(value)
}

pub fn classify(record: &Record) -> Result<Classified, ParseError> {
    let failed = leading_number(record, "failed")?.unwrap_or(0);
    let exit_code = leading_number(record, "exit_status")?;

    let failure = match (failed, exit_code) {
        (0 | FAILED_AFTER_JOB, Some(code)) if code > 128 => Some(JobFailure::canceled(format!(
            "killed by signal {}",
            code - 128
        ))),
        (FAILED_AFTER_JOB, _) => Some(JobFailure::canceled("deleted with qdel")),
        (0, Some(0) | None) => None,
        (0, Some(code)) => Some(JobFailure::error(format!("job exited with code {code}"))),
        _ => Some(JobFailure::error(format!(
            "job failed: {}",
            record.get("failed").map(String::as_str).unwrap_or_default()
        ))),
    };
    let native = if failure.is_some() { "failed" } else { "done" };

    Ok(Classified::new(
        native,
        JobState::Finished { exit_code, failure },
    ))
}
