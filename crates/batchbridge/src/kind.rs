//! Scheduler selection and detection.

use batchbridge_core::{Dialect, SchedulerError};
use batchbridge_gridengine::GridEngine;
use batchbridge_parsers::CommandRunner;
use batchbridge_slurm::Slurm;
use batchbridge_torque::Torque;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which scheduler a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Slurm,
    GridEngine,
    Torque,
    Local,
}

impl SchedulerKind {
    pub const ALL: [SchedulerKind; 4] = [
        SchedulerKind::Slurm,
        SchedulerKind::GridEngine,
        SchedulerKind::Torque,
        SchedulerKind::Local,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Slurm => batchbridge_slurm::dialect::NAME,
            Self::GridEngine => batchbridge_gridengine::dialect::NAME,
            Self::Torque => batchbridge_torque::dialect::NAME,
            Self::Local => batchbridge_local::NAME,
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown scheduler: {s}"))
    }
}

/// Whether `dialect`'s probe command runs and looks like its scheduler.
async fn answers<D: Dialect>(dialect: &D, runner: &dyn CommandRunner) -> bool {
    let probe = dialect.probe_command();
    match runner
        .run(probe.stdin.as_deref(), &probe.program, &probe.args)
        .await
    {
        Ok(output) => match dialect.check_server(&output, true) {
            Ok(_) => true,
            Err(SchedulerError::CommandFailed { .. }) => false,
            Err(e) => {
                tracing::debug!("{} probe answered but was rejected: {}", dialect.name(), e);
                false
            }
        },
        Err(e) => {
            tracing::debug!("{} not available: {}", dialect.name(), e);
            false
        }
    }
}

/// Detect which scheduler is available, trying Slurm, Grid Engine and then
/// Torque. The local executor is never detected.
pub async fn detect_scheduler(runner: &dyn CommandRunner) -> Option<SchedulerKind> {
    let kind = if answers(&Slurm, runner).await {
        SchedulerKind::Slurm
    } else if answers(&GridEngine, runner).await {
        SchedulerKind::GridEngine
    } else if answers(&Torque, runner).await {
        SchedulerKind::Torque
    } else {
        return None;
    };
    tracing::info!("Detected {} scheduler", kind);
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_parsers::{CommandOutput, ScriptedRunner};

    #[test]
    fn test_kind_names() {
        assert_eq!("gridengine".parse::<SchedulerKind>(), Ok(SchedulerKind::GridEngine));
        assert_eq!("SLURM".parse::<SchedulerKind>(), Ok(SchedulerKind::Slurm));
        assert!("lsf".parse::<SchedulerKind>().is_err());
        assert_eq!(SchedulerKind::Local.to_string(), "local");
        assert_eq!(
            serde_json::to_string(&SchedulerKind::GridEngine).unwrap(),
            "\"gridengine\""
        );
    }

    #[tokio::test]
    async fn test_detect_slurm_first() {
        let runner = ScriptedRunner::new();
        runner
            .respond(
                "scontrol show config",
                CommandOutput::ok("SLURM_VERSION = 23.02.7\n"),
            )
            .respond("qconf -help", CommandOutput::ok("GE 6.2u5\n"));
        assert_eq!(detect_scheduler(&runner).await, Some(SchedulerKind::Slurm));
        assert_eq!(runner.count("qconf"), 0);
    }

    #[tokio::test]
    async fn test_detect_falls_through() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "qstat --version",
            CommandOutput::new(0, "", "Version: 4.2.10\n"),
        );
        assert_eq!(detect_scheduler(&runner).await, Some(SchedulerKind::Torque));
        assert_eq!(runner.count("scontrol"), 1);
        assert_eq!(runner.count("qconf"), 1);
    }

    #[tokio::test]
    async fn test_detect_nothing() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "qstat --version",
            CommandOutput::new(127, "", "qstat: command not found\n"),
        );
        assert_eq!(detect_scheduler(&runner).await, None);
    }
}
