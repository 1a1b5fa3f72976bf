//! Slurm job state vocabulary.

use batchbridge_core::{JobFailure, JobState};
use batchbridge_parsers::{ParseError, parse_exit_code, parse_exit_signal};

/// Slurm job state, as printed by squeue, sacct and scontrol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmJobState {
    Pending,
    Running,
    Suspended,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    OutOfMemory,
    NodeFail,
    Preempted,
    Unknown(String),
}

impl SlurmJobState {
    /// Parse a state string. Accounting adds suffixes such as
    /// `CANCELLED by 1000`; only the first word counts.
    pub fn parse(s: &str) -> Self {
        let base = s.split_whitespace().next().unwrap_or(s).trim_end_matches('+');
        match base.to_uppercase().as_str() {
            "PENDING" | "PD" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESV_DEL_HOLD" => {
                Self::Pending
            }
            "RUNNING" | "R" | "CONFIGURING" | "CF" | "RESIZING" | "SIGNALING" | "STAGE_OUT" => {
                Self::Running
            }
            "SUSPENDED" | "S" | "STOPPED" | "ST" => Self::Suspended,
            "COMPLETING" | "CG" => Self::Completing,
            "COMPLETED" | "CD" => Self::Completed,
            "CANCELLED" | "CA" => Self::Cancelled,
            "FAILED" | "F" | "BOOT_FAIL" | "BF" | "DEADLINE" | "DL" | "SPECIAL_EXIT" | "SE" => {
                Self::Failed
            }
            "TIMEOUT" | "TO" => Self::Timeout,
            "OUT_OF_MEMORY" | "OOM" => Self::OutOfMemory,
            "NODE_FAIL" | "NF" => Self::NodeFail,
            "PREEMPTED" | "PR" => Self::Preempted,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::Running | Self::Suspended | Self::Completing | Self::Unknown(_)
        )
    }

    /// Canonical state, given the `N:S` exit code reported alongside.
    pub fn to_job_state(&self, exit_code: Option<&str>) -> Result<JobState, ParseError> {
        let state = match self {
            Self::Pending | Self::Suspended => JobState::Pending,
            Self::Running | Self::Completing => JobState::Running,
            Self::Unknown(raw) => {
                tracing::warn!("Unknown Slurm job state {}, treating it as pending", raw);
                JobState::Pending
            }
            terminal => {
                let code = parse_exit_code(exit_code.filter(|s| !s.trim().is_empty()))?;
                let signal = exit_code.and_then(parse_exit_signal);
                JobState::Finished {
                    exit_code: code,
                    failure: terminal.failure(code, signal),
                }
            }
        };
        Ok(state)
    }

    fn failure(&self, code: Option<i32>, signal: Option<i32>) -> Option<JobFailure> {
        match (self, signal) {
            (Self::Cancelled, _) => Some(JobFailure::canceled("job cancelled")),
            (Self::Preempted, _) => Some(JobFailure::canceled("job preempted")),
            (_, Some(signal)) => Some(JobFailure::canceled(format!("killed by signal {signal}"))),
            (Self::Timeout, _) => Some(JobFailure::error("job exceeded its time limit")),
            (Self::OutOfMemory, _) => Some(JobFailure::error("job exceeded its memory limit")),
            (Self::NodeFail, _) => Some(JobFailure::error("node failure")),
            (Self::Failed, _) => Some(JobFailure::error(format!(
                "job failed with exit code {}",
                code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ))),
            (_, None) => match code {
                Some(0) | None => None,
                Some(code) => Some(JobFailure::error(format!("job exited with code {code}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(SlurmJobState::parse("RUNNING"), SlurmJobState::Running);
        assert_eq!(SlurmJobState::parse("PD"), SlurmJobState::Pending);
        assert_eq!(
            SlurmJobState::parse("CANCELLED by 12345"),
            SlurmJobState::Cancelled
        );
        assert_eq!(SlurmJobState::parse("CANCELLED+"), SlurmJobState::Cancelled);
        assert_eq!(
            SlurmJobState::parse("WEIRD"),
            SlurmJobState::Unknown("WEIRD".to_string())
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(SlurmJobState::Completed.is_terminal());
        assert!(SlurmJobState::Timeout.is_terminal());
        assert!(!SlurmJobState::Completing.is_terminal());
        assert!(!SlurmJobState::Pending.is_terminal());
    }

    #[test]
    fn test_completed_success() {
        let state = SlurmJobState::Completed.to_job_state(Some("0:0")).unwrap();
        assert_eq!(
            state,
            JobState::Finished {
                exit_code: Some(0),
                failure: None
            }
        );
    }

    #[test]
    fn test_signal_means_cancelled() {
        let state = SlurmJobState::Failed.to_job_state(Some("0:9")).unwrap();
        match state {
            JobState::Finished {
                failure: Some(failure),
                ..
            } => assert!(failure.is_canceled()),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_failures() {
        for (state, exit) in [
            (SlurmJobState::Failed, "1:0"),
            (SlurmJobState::Completed, "3:0"),
            (SlurmJobState::Timeout, "0:0"),
            (SlurmJobState::NodeFail, "0:0"),
        ] {
            match state.to_job_state(Some(exit)).unwrap() {
                JobState::Finished {
                    failure: Some(JobFailure::Error { .. }),
                    ..
                } => {}
                other => panic!("{state:?} {exit}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_garbage_exit_code() {
        assert!(SlurmJobState::Completed.to_job_state(Some("x:y")).is_err());
    }
}
