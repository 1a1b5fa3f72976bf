//! Opening a connection to any supported scheduler.

use batchbridge_core::{ConnectionConfig, Result, Scheduler, SchedulerConnection};
use batchbridge_gridengine::GridEngine;
use batchbridge_local::{LocalConfig, LocalScheduler};
use batchbridge_parsers::CommandRunner;
use batchbridge_slurm::Slurm;
use batchbridge_torque::Torque;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::kind::{SchedulerKind, detect_scheduler};

/// Settings for every kind of connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler to use; detected when unset.
    pub scheduler: Option<SchedulerKind>,
    pub connection: ConnectionConfig,
    pub local: LocalConfig,
}

/// Connect to a `kind` scheduler, running its commands through `runner`.
///
/// The local executor starts its own processes and ignores `runner`.
pub async fn connect(
    kind: SchedulerKind,
    runner: Arc<dyn CommandRunner>,
    config: &Config,
) -> Result<Box<dyn Scheduler>> {
    let connection = config.connection.clone();
    let scheduler: Box<dyn Scheduler> = match kind {
        SchedulerKind::Slurm => {
            Box::new(SchedulerConnection::connect(Slurm, runner, connection).await?)
        }
        SchedulerKind::GridEngine => {
            Box::new(SchedulerConnection::connect(GridEngine, runner, connection).await?)
        }
        SchedulerKind::Torque => {
            Box::new(SchedulerConnection::connect(Torque, runner, connection).await?)
        }
        SchedulerKind::Local => Box::new(LocalScheduler::connect(config.local.clone()).await?),
    };
    Ok(scheduler)
}

/// Connect to the configured scheduler, or the detected one, falling back to
/// the local executor when no batch scheduler answers.
pub async fn connect_any(runner: Arc<dyn CommandRunner>, config: &Config) -> Result<Box<dyn Scheduler>> {
    let kind = match config.scheduler {
        Some(kind) => kind,
        None => match detect_scheduler(runner.as_ref()).await {
            Some(kind) => kind,
            None => {
                tracing::info!("No batch scheduler found, running jobs locally");
                SchedulerKind::Local
            }
        },
    };
    connect(kind, runner, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_core::JobDescription;
    use batchbridge_parsers::{CommandOutput, ScriptedRunner};
    use camino::Utf8Path;
    use std::time::Duration;

    #[test]
    fn test_config_from_json() {
        let config: Config = serde_json::from_str(
            r#"{"scheduler": "torque", "connection": {"ignore_version": true}, "local": {"multi_cores": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.scheduler, Some(SchedulerKind::Torque));
        assert!(config.connection.ignore_version);
        assert_eq!(config.connection.accounting_grace_secs, 60);
        assert_eq!(config.local.multi_cores, Some(2));

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn test_connect_gridengine() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond("qconf -help", CommandOutput::ok("SGE 8.1.9\n"))
            .respond("pwd", CommandOutput::ok("/home/alice\n"));
        let scheduler = connect(SchedulerKind::GridEngine, runner, &Config::default())
            .await
            .unwrap();
        assert_eq!(scheduler.name(), "gridengine");
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_version() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("qstat --version", CommandOutput::ok("Version: 1.0\n"));
        let result = connect(SchedulerKind::Torque, runner, &Config::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.local.entry_directory = Some(Utf8Path::from_path(dir.path()).unwrap().to_path_buf());
        config.local.poll_delay_ms = 10;

        let scheduler = connect_any(Arc::new(ScriptedRunner::new()), &config)
            .await
            .unwrap();
        assert_eq!(scheduler.name(), "local");

        let job = scheduler
            .submit(&JobDescription::new("/bin/true"))
            .await
            .unwrap();
        let status = scheduler
            .wait_until_done(&job, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(status.succeeded());
        scheduler.close().await.unwrap();
    }
}
