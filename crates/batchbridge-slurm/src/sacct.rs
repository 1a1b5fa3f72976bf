//! Terminal job records via sacct, or `scontrol show job` when the cluster
//! has no accounting storage.

use batchbridge_core::{Classified, CommandLine};
use batchbridge_parsers::{
    CommandOutput, ParseError, Record, Records, join_ids, non_empty_string, parse_table,
};

use crate::types::SlurmJobState;

/// sacct output format (--parsable2 uses | delimiter)
const SACCT_FORMAT: &str = "JobID,JobName,Partition,NTasks,Elapsed,State,ExitCode";

pub fn sacct_command(ids: &[&str]) -> CommandLine {
    CommandLine::new("sacct").args([
        "-X".to_string(),
        "--parsable2".to_string(),
        format!("--format={SACCT_FORMAT}"),
        format!("--jobs={}", join_ids(ids.iter().map(Some))),
    ])
}

pub fn scontrol_command(id: &str) -> CommandLine {
    CommandLine::new("scontrol").args(["show", "job", id])
}

pub fn parse_sacct(stdout: &str) -> Result<Records, ParseError> {
    parse_table(stdout, "|", "JobID")
}

/// Parse `scontrol show job` output: whitespace separated `Key=Value`
/// tokens, one paragraph per job.
pub fn parse_scontrol(stdout: &str) -> Result<Records, ParseError> {
    let mut records = Records::new();
    for paragraph in stdout.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let mut record = Record::new();
        for token in paragraph.split_whitespace() {
            // Values with spaces (Command=, Comment=) spill into extra tokens.
            if let Some((key, value)) = token.split_once('=') {
                record.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
        let id = record
            .get("JobId")
            .cloned()
            .ok_or_else(|| ParseError::new("scontrol record without JobId", paragraph.trim()))?;
        records.insert(id, record);
    }
    Ok(records)
}

/// Classify either record shape.
pub fn classify(record: &Record) -> Result<Classified, ParseError> {
    let native = record
        .get("State")
        .or_else(|| record.get("JobState"))
        .ok_or_else(|| ParseError::new("accounting record without state", format!("{record:?}")))?;
    let exit_code = record.get("ExitCode").and_then(|s| non_empty_string(s));
    let state = SlurmJobState::parse(native).to_job_state(exit_code.as_deref())?;
    Ok(Classified::new(native.as_str(), state))
}

/// `scontrol show job` fails for jobs that have been purged.
pub fn is_missing(output: &CommandOutput) -> bool {
    output.stderr.contains("Invalid job id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_core::{JobFailure, JobState};

    const SACCT: &str = "\
JobID|JobName|Partition|NTasks|Elapsed|State|ExitCode
201|batchbridge|short||00:00:05|COMPLETED|0:0
202|batchbridge|short||00:01:00|CANCELLED by 1000|0:15
203|batchbridge|short||00:00:01|FAILED|2:0
204|batchbridge|short||00:00:00|RUNNING|0:0
";

    const SCONTROL: &str = "\
JobId=301 JobName=batchbridge
   UserId=alice(1000) GroupId=alice(1000) MCS_label=N/A
   JobState=COMPLETED Reason=None Dependency=(null)
   Requeue=1 Restarts=0 BatchFlag=1 Reboot=0 ExitCode=0:0
   Command=/home/alice/run job.sh
";

    #[test]
    fn test_sacct_command_joins_ids() {
        let cmd = sacct_command(&["1", "2", "3"]);
        assert_eq!(
            cmd.to_string(),
            "sacct -X --parsable2 --format=JobID,JobName,Partition,NTasks,Elapsed,State,ExitCode --jobs=1,2,3"
        );
    }

    #[test]
    fn test_classify_sacct() {
        let records = parse_sacct(SACCT).unwrap();

        let done = classify(&records["201"]).unwrap();
        assert_eq!(
            done.state,
            JobState::Finished {
                exit_code: Some(0),
                failure: None
            }
        );

        let cancelled = classify(&records["202"]).unwrap();
        assert_eq!(cancelled.native, "CANCELLED by 1000");
        match cancelled.state {
            JobState::Finished {
                failure: Some(failure),
                ..
            } => assert!(failure.is_canceled()),
            other => panic!("unexpected {other:?}"),
        }

        match classify(&records["203"]).unwrap().state {
            JobState::Finished {
                exit_code: Some(2),
                failure: Some(JobFailure::Error { .. }),
            } => {}
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(classify(&records["204"]).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_parse_scontrol() {
        let records = parse_scontrol(SCONTROL).unwrap();
        let record = &records["301"];
        assert_eq!(record["JobState"], "COMPLETED");
        assert_eq!(record["Command"], "/home/alice/run");
        assert_eq!(
            classify(record).unwrap().state,
            JobState::Finished {
                exit_code: Some(0),
                failure: None
            }
        );
    }

    #[test]
    fn test_scontrol_missing_job() {
        let output = CommandOutput::new(
            1,
            "",
            "slurm_load_jobs error: Invalid job id specified\n",
        );
        assert!(is_missing(&output));
    }
}
