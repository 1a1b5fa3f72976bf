//! Job listing via `qstat -x` and queue records via `qstat -Q -f -1`.

use batchbridge_core::{Classified, CommandLine, JobFailure, JobState};
use batchbridge_parsers::{
    ParseError, Record, Records, Separator, index_records, parse_exit_code, parse_keyed_blocks,
    xml_records,
};

pub const JOB_ID_FIELD: &str = "Job_Id";

/// Exit statuses above this mean the job was killed by signal
/// `status - 256`.
const SIGNAL_OFFSET: i32 = 256;

pub fn jobs_command(queues: &[String]) -> CommandLine {
    CommandLine::new("qstat").arg("-x").args(queues.iter().cloned())
}

pub fn queues_command() -> CommandLine {
    CommandLine::new("qstat").args(["-Q", "-f", "-1"])
}

/// Jobs keyed by `Job_Id`. qstat prints nothing at all when there are no
/// jobs.
pub fn parse_jobs(text: &str) -> Result<Records, ParseError> {
    if text.trim().is_empty() {
        return Ok(Records::new());
    }
    xml_records(text, "Job", JOB_ID_FIELD)
}

/// Queue blocks keyed by name. Each block starts with `Queue: name`.
pub fn parse_queues(text: &str) -> Result<Records, ParseError> {
    let normalized: String = text
        .lines()
        .map(|line| match line.strip_prefix("Queue:") {
            Some(name) => format!("Queue = {}\n", name.trim()),
            None => format!("{line}\n"),
        })
        .collect();
    let blocks = parse_keyed_blocks(&normalized, Separator::Token("="), "Queue", &[])?;
    index_records(blocks, "Queue")
}

fn finished(record: &Record) -> Result<JobState, ParseError> {
    let exit_code = parse_exit_code(record.get("exit_status").map(String::as_str))?;
    let failure = match exit_code {
        None | Some(0) => None,
        Some(code) if code > SIGNAL_OFFSET => Some(JobFailure::canceled(format!(
            "killed by signal {}",
            code - SIGNAL_OFFSET
        ))),
        Some(code) if code < 0 => Some(JobFailure::error(format!(
            "job could not be started (exit status {code})"
        ))),
        Some(code) => Some(JobFailure::error(format!("job exited with code {code}"))),
    };
    Ok(JobState::Finished { exit_code, failure })
}

/// Classify a job from its single letter state.
pub fn classify(record: &Record) -> Result<Classified, ParseError> {
    let native = record
        .get("job_state")
        .ok_or_else(|| ParseError::new("Job without <job_state>", format!("{record:?}")))?;
    let state = match native.as_str() {
        "Q" | "H" | "W" | "S" | "T" => JobState::Pending,
        "R" | "E" => JobState::Running,
        "C" => finished(record)?,
        other => {
            tracing::warn!("Unknown Torque job state {}, treating it as pending", other);
            JobState::Pending
        }
    };
    Ok(Classified::new(native.as_str(), state))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "<Data>\
<Job><Job_Id>101.head</Job_Id><Job_Name>batchbridge</Job_Name><job_state>R</job_state>\
<queue>batch</queue><Resource_List><nodes>1:ppn=1</nodes><walltime>00:15:00</walltime></Resource_List></Job>\
<Job><Job_Id>102.head</Job_Id><Job_Name>batchbridge</Job_Name><job_state>Q</job_state><queue>batch</queue></Job>\
<Job><Job_Id>103.head</Job_Id><Job_Name>batchbridge</Job_Name><job_state>C</job_state><queue>batch</queue><exit_status>0</exit_status></Job>\
<Job><Job_Id>104.head</Job_Id><Job_Name>batchbridge</Job_Name><job_state>C</job_state><queue>batch</queue><exit_status>271</exit_status></Job>\
<Job><Job_Id>105.head</Job_Id><Job_Name>batchbridge</Job_Name><job_state>C</job_state><queue>batch</queue><exit_status>2</exit_status></Job>\
</Data>";

    #[test]
    fn test_jobs_command() {
        assert_eq!(jobs_command(&[]).to_string(), "qstat -x");
        assert_eq!(
            jobs_command(&["batch".to_string()]).to_string(),
            "qstat -x batch"
        );
    }

    #[test]
    fn test_parse_jobs() {
        let jobs = parse_jobs(LISTING).unwrap();
        assert_eq!(jobs.len(), 5);
        assert_eq!(jobs["101.head"]["Resource_List.walltime"], "00:15:00");
        assert!(parse_jobs("\n").unwrap().is_empty());
    }

    #[test]
    fn test_classify() {
        let jobs = parse_jobs(LISTING).unwrap();
        assert_eq!(classify(&jobs["101.head"]).unwrap().state, JobState::Running);
        assert_eq!(classify(&jobs["102.head"]).unwrap().state, JobState::Pending);
        assert_eq!(
            classify(&jobs["103.head"]).unwrap().state,
            JobState::Finished {
                exit_code: Some(0),
                failure: None
            }
        );
        match classify(&jobs["104.head"]).unwrap().state {
            JobState::Finished {
                failure: Some(JobFailure::Canceled { reason }),
                ..
            } => assert_eq!(reason, "killed by signal 15"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify(&jobs["105.head"]).unwrap().state,
            JobState::Finished {
                failure: Some(JobFailure::Error { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_queues() {
        let text = "\
Queue: batch
    queue_type = Execution
    total_jobs = 3
    state_count = Transit:0 Queued:1 Held:0 Waiting:0 Running:2 Exiting:0
    resources_default.neednodes = 1:ppn=1
    enabled = True
    started = True

Queue: debug
    queue_type = Execution
    total_jobs = 0
    enabled = False
    started = True
";
        let queues = parse_queues(text).unwrap();
        assert_eq!(queues.keys().collect::<Vec<_>>(), vec!["batch", "debug"]);
        assert_eq!(queues["batch"]["resources_default.neednodes"], "1:ppn=1");
        assert_eq!(queues["debug"]["enabled"], "False");
    }
}
