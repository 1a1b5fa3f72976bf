//! Job and queue listings via `qstat -xml`.

use batchbridge_core::{Classified, CommandLine, JobState};
use batchbridge_parsers::{ParseError, Record, Records, XmlRoot, xml_records, xml_root};

/// Schema revision of the qstat XML output this parser understands.
pub const SCHEMA_REVISION: &str = "qstat.xsd?revision=1.11";

pub const JOB_ID_FIELD: &str = "JB_job_number";

/// What was wrong with a qstat document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingProblem {
    Malformed(ParseError),
    /// Well formed but declares a schema other than [`SCHEMA_REVISION`].
    Schema(String),
}

impl From<ParseError> for ListingProblem {
    fn from(e: ParseError) -> Self {
        Self::Malformed(e)
    }
}

pub fn jobs_command(queues: &[String]) -> CommandLine {
    let command = CommandLine::new("qstat").arg("-xml");
    if queues.is_empty() {
        command
    } else {
        command.args(["-q".to_string(), queues.join(",")])
    }
}

pub fn queues_command() -> CommandLine {
    CommandLine::new("qstat").args(["-xml", "-g", "c"])
}

fn check_root(text: &str, ignore_version: bool) -> Result<(), ListingProblem> {
    let XmlRoot { name, schema } = xml_root(text)?;
    if name != "job_info" {
        return Err(ParseError::new("qstat document root is not <job_info>", name).into());
    }
    match schema {
        Some(schema) if schema.ends_with(SCHEMA_REVISION) => Ok(()),
        _ if ignore_version => Ok(()),
        Some(schema) => Err(ListingProblem::Schema(schema)),
        None => Err(ListingProblem::Schema("no schema declared".to_string())),
    }
}

/// Jobs in the listing keyed by job number.
pub fn parse_jobs(text: &str, ignore_version: bool) -> Result<Records, ListingProblem> {
    check_root(text, ignore_version)?;
    Ok(xml_records(text, "job_list", JOB_ID_FIELD)?)
}

/// Cluster queue summary keyed by queue name.
pub fn parse_queues(text: &str) -> Result<Records, ParseError> {
    xml_records(text, "cluster_queue_summary", "name")
}

/// Classify a listed job from its state letters (`qw`, `r`, `Eqw`, `hqw`,
/// `t`, `dr`).
pub fn classify(record: &Record) -> Result<Classified, ParseError> {
    let native = record
        .get("state")
        .ok_or_else(|| ParseError::new("job_list without <state>", format!("{record:?}")))?;
    let state = if native.contains('E') {
        JobState::Error {
            detail: format!("qstat reports state {native}"),
        }
    } else if native.contains('r') || native.contains('t') {
        JobState::Running
    } else {
        JobState::Pending
    };
    Ok(Classified::new(native.as_str(), state))
}
