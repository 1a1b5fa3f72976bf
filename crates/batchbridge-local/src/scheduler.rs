//! The local executor behind the [`Scheduler`] interface.

use async_trait::async_trait;
use batchbridge_core::{
    JobDescription, JobFailure, JobHandle, JobStatus, QueueStatus, Result, Rules, Scheduler,
    SchedulerError, verify,
};
use batchbridge_parsers::CommandError;
use camino::Utf8PathBuf;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LocalConfig;
use crate::job::{self, JobEntry, LocalState, Outcome};
use crate::queue::{History, QueueKind};

pub const NAME: &str = "local";

#[derive(Debug, Default)]
struct Registry {
    jobs: HashMap<String, JobEntry>,
    history: History,
}

impl Registry {
    fn purge(&mut self, queue: QueueKind, max: usize) {
        let jobs = &self.jobs;
        let dropped = self.history.purge(queue, max, |id| {
            jobs.get(id).is_none_or(|entry| entry.state.is_finished())
        });
        for id in dropped {
            self.jobs.remove(&id);
        }
    }
}

/// State shared with the dispatcher and job tasks.
struct Shared {
    entry: Utf8PathBuf,
    max_history: usize,
    registry: Mutex<Registry>,
}

impl Shared {
    /// Cancellation token of a job that still has to start.
    async fn pending_token(&self, id: &str) -> Option<CancellationToken> {
        let registry = self.registry.lock().await;
        registry
            .jobs
            .get(id)
            .filter(|entry| !entry.state.is_finished())
            .map(|entry| entry.token.clone())
    }

    /// Move a job to `state`, returning its description. A job that was
    /// cancelled meanwhile is finished instead and `None` is returned.
    async fn advance(&self, id: &str, state: LocalState) -> Option<JobDescription> {
        let mut registry = self.registry.lock().await;
        let entry = registry.jobs.get_mut(id)?;
        if entry.state.is_finished() {
            return None;
        }
        if entry.token.is_cancelled() {
            entry.finish(Outcome::failed(JobFailure::canceled("killed before start")));
            return None;
        }
        entry.advance(state);
        Some(entry.description.clone())
    }

    async fn finish(&self, id: &str, outcome: Outcome) {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.jobs.get_mut(id) else {
            return;
        };
        tracing::info!("{}: job {} finished as {}", NAME, id, outcome.state);
        entry.finish(outcome);
        let queue = entry.queue;
        registry.purge(queue, self.max_history);
    }
}

async fn run_job(shared: Arc<Shared>, id: String, token: CancellationToken) {
    let Some(description) = shared.advance(&id, LocalState::Staging).await else {
        return;
    };
    let mut command = match job::stage(&id, &description, &shared.entry).await {
        Ok(command) => command,
        Err(e) => {
            let failure = JobFailure::error(format!("staging failed: {e}"));
            shared.finish(&id, Outcome::failed(failure)).await;
            return;
        }
    };

    if shared.advance(&id, LocalState::Scheduled).await.is_none() {
        return;
    }
    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let failure = JobFailure::error(format!("could not start process: {e}"));
            shared.finish(&id, Outcome::failed(failure)).await;
            return;
        }
    };
    // Dropping the child kills it, so bailing out here is safe.
    if shared.advance(&id, LocalState::Running).await.is_none() {
        return;
    }
    tracing::debug!("{}: job {} running as pid {:?}", NAME, id, child.id());

    let max_runtime = description
        .max_runtime
        .map(|minutes| Duration::from_secs(u64::from(minutes) * 60));
    let outcome = job::supervise(child, max_runtime, &token).await;
    shared.finish(&id, outcome).await;
}

/// Start the queue's jobs in submission order, holding one worker permit
/// per running job.
async fn dispatch(
    shared: Arc<Shared>,
    mut jobs: mpsc::UnboundedReceiver<String>,
    workers: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = jobs.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };
        let Some(token) = shared.pending_token(&id).await else {
            continue;
        };

        let permit: Option<OwnedSemaphorePermit> = match &workers {
            Some(workers) => tokio::select! {
                _ = token.cancelled() => continue,
                permit = workers.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let shared = shared.clone();
        tokio::spawn(async move {
            run_job(shared, id, token).await;
            drop(permit);
        });
    }
}

pub struct LocalScheduler {
    id: Uuid,
    config: LocalConfig,
    shared: Arc<Shared>,
    queues: HashMap<QueueKind, mpsc::UnboundedSender<String>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl LocalScheduler {
    /// Start the queue dispatchers. Must run inside a tokio runtime.
    pub async fn connect(config: LocalConfig) -> Result<Self> {
        let entry = match &config.entry_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| e.to_string())
                .and_then(|dir| Utf8PathBuf::try_from(dir).map_err(|e| e.to_string()))
                .map_err(|error| {
                    SchedulerError::command(
                        NAME,
                        CommandError::Execution {
                            command: "pwd".to_string(),
                            error,
                        },
                    )
                })?,
        };

        let shared = Arc::new(Shared {
            entry,
            max_history: config.max_history,
            registry: Mutex::new(Registry::default()),
        });
        let shutdown = CancellationToken::new();

        let mut queues = HashMap::new();
        for kind in QueueKind::ALL {
            let workers = match kind {
                QueueKind::Single => Some(Arc::new(Semaphore::new(1))),
                QueueKind::Multi => Some(Arc::new(Semaphore::new(config.multi_workers()))),
                QueueKind::Unlimited => None,
            };
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(dispatch(shared.clone(), rx, workers, shutdown.clone()));
            queues.insert(kind, tx);
        }

        let id = Uuid::new_v4();
        tracing::info!(
            "{}: started executor {} in {} with {} multi workers",
            NAME,
            id,
            shared.entry,
            config.multi_workers()
        );

        Ok(Self {
            id,
            config,
            shared,
            queues,
            next_id: AtomicU64::new(0),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::Closed { scheduler: NAME });
        }
        Ok(())
    }

    fn check_handle(&self, job: &JobHandle) -> Result<()> {
        if job.scheduler_id() != self.id {
            return Err(SchedulerError::InvalidJobHandle {
                scheduler: NAME,
                job_id: job.id().to_string(),
            });
        }
        Ok(())
    }

    fn queue_kind(&self, name: &str) -> Result<QueueKind> {
        QueueKind::parse(name).ok_or_else(|| SchedulerError::no_such_queue(NAME, name))
    }

    fn queue_info(&self, queue: QueueKind, registry: &Registry) -> BTreeMap<String, String> {
        let workers = match queue {
            QueueKind::Single => "1".to_string(),
            QueueKind::Multi => self.config.multi_workers().to_string(),
            QueueKind::Unlimited => "unlimited".to_string(),
        };
        let states: Vec<LocalState> = registry
            .history
            .ids(queue)
            .filter_map(|id| registry.jobs.get(id).map(|entry| entry.state))
            .collect();

        let mut info = BTreeMap::new();
        info.insert("workers".to_string(), workers);
        info.insert("jobs".to_string(), states.len().to_string());
        info.insert(
            "waiting".to_string(),
            states.iter().filter(|s| s.is_waiting()).count().to_string(),
        );
        info.insert(
            "running".to_string(),
            states
                .iter()
                .filter(|s| **s == LocalState::Running)
                .count()
                .to_string(),
        );
        info
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Local jobs run on this host only.
fn local_rules(desc: &JobDescription) -> std::result::Result<(), String> {
    if desc.node_count != 1 {
        return Err(format!(
            "local jobs run on one node, not {}",
            desc.node_count
        ));
    }
    if desc.processes_per_node > 1 && !desc.start_single_process {
        return Err(format!(
            "local jobs start one process; set start_single_process to request {} processes",
            desc.processes_per_node
        ));
    }
    Ok(())
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn poll_delay(&self) -> Duration {
        self.config.poll_delay()
    }

    async fn submit(&self, description: &JobDescription) -> Result<JobHandle> {
        self.ensure_open()?;

        let queue = match description.queue.as_deref() {
            None => QueueKind::default(),
            Some(name) => QueueKind::parse(name).ok_or_else(|| {
                SchedulerError::invalid(
                    NAME,
                    format!("unknown queue {name}; expected single, multi or unlimited"),
                )
            })?,
        };
        let rules = Rules {
            scheduler: NAME,
            job_options: &[],
            has_default_runtime: true,
            interactive_allowed: false,
        };
        verify(description, &rules, local_rules)?;

        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = self.shutdown.child_token();
        {
            let mut registry = self.shared.registry.lock().await;
            registry.jobs.insert(
                id.clone(),
                JobEntry::new(&id, queue, description.clone(), token),
            );
            registry.history.push(queue, &id);
            registry.purge(queue, self.config.max_history);
        }

        let sender = self
            .queues
            .get(&queue)
            .ok_or(SchedulerError::Closed { scheduler: NAME })?;
        sender
            .send(id.clone())
            .map_err(|_| SchedulerError::Closed { scheduler: NAME })?;

        tracing::info!("{}: submitted job {} to queue {}", NAME, id, queue);
        Ok(JobHandle::new(id, NAME, self.id, Some(description.clone())))
    }

    async fn cancel(&self, job: &JobHandle) -> Result<JobStatus> {
        self.ensure_open()?;
        self.check_handle(job)?;

        let mut done = {
            let mut registry = self.shared.registry.lock().await;
            let entry = registry
                .jobs
                .get_mut(job.id())
                .ok_or_else(|| SchedulerError::no_such_job(NAME, job.id()))?;
            if entry.state.is_finished() {
                return Ok(entry.status());
            }
            entry.token.cancel();
            if entry.state == LocalState::Initial {
                entry.finish(Outcome::failed(JobFailure::canceled("killed before start")));
                tracing::info!("{}: cancelled job {} before it started", NAME, job.id());
                return Ok(entry.status());
            }
            entry.done.subscribe()
        };

        // The worker finishes the job, whether it exited on its own or was
        // killed. Only close() drops an unfinished entry.
        if done.wait_for(|finished| *finished).await.is_err() {
            tracing::debug!("{}: job {} dropped while being cancelled", NAME, job.id());
            return Err(SchedulerError::Closed { scheduler: NAME });
        }
        tracing::info!("{}: cancelled job {}", NAME, job.id());
        self.get_job_status(job).await
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        self.ensure_open()?;
        self.check_handle(job)?;
        let registry = self.shared.registry.lock().await;
        registry
            .jobs
            .get(job.id())
            .map(JobEntry::status)
            .ok_or_else(|| SchedulerError::no_such_job(NAME, job.id()))
    }

    async fn get_job_statuses(&self, jobs: &[Option<JobHandle>]) -> Vec<Option<Result<JobStatus>>> {
        let registry = self.shared.registry.lock().await;
        jobs.iter()
            .map(|job| {
                let job = job.as_ref()?;
                Some(
                    self.ensure_open()
                        .and_then(|()| self.check_handle(job))
                        .and_then(|()| {
                            registry
                                .jobs
                                .get(job.id())
                                .map(JobEntry::status)
                                .ok_or_else(|| SchedulerError::no_such_job(NAME, job.id()))
                        }),
                )
            })
            .collect()
    }

    async fn get_jobs(&self, queues: &[String]) -> Result<Vec<JobHandle>> {
        self.ensure_open()?;
        let kinds = if queues.is_empty() {
            QueueKind::ALL.to_vec()
        } else {
            queues
                .iter()
                .map(|name| self.queue_kind(name))
                .collect::<Result<Vec<_>>>()?
        };

        let guard = self.shared.registry.lock().await;
        let registry: &Registry = &guard;
        Ok(kinds
            .into_iter()
            .flat_map(|kind| registry.history.ids(kind))
            .filter_map(|id| registry.jobs.get(id))
            .filter(|entry| !entry.state.is_finished())
            .map(|entry| {
                JobHandle::new(&entry.id, NAME, self.id, Some(entry.description.clone()))
            })
            .collect())
    }

    async fn get_queue_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(QueueKind::ALL.iter().map(|kind| kind.to_string()).collect())
    }

    async fn get_default_queue_name(&self) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(Some(QueueKind::default().to_string()))
    }

    async fn get_queue_status(&self, queue: &str) -> Result<QueueStatus> {
        self.ensure_open()?;
        let kind = self.queue_kind(queue)?;
        let registry = self.shared.registry.lock().await;
        Ok(QueueStatus::new(queue, self.id, self.queue_info(kind, &registry)))
    }

    async fn get_queue_statuses(&self, queues: &[String]) -> Result<Vec<QueueStatus>> {
        self.ensure_open()?;
        let registry = self.shared.registry.lock().await;
        if queues.is_empty() {
            return Ok(QueueKind::ALL
                .into_iter()
                .map(|kind| QueueStatus::new(kind.name(), self.id, self.queue_info(kind, &registry)))
                .collect());
        }
        Ok(queues
            .iter()
            .map(|name| match self.queue_kind(name) {
                Ok(kind) => QueueStatus::new(name, self.id, self.queue_info(kind, &registry)),
                Err(e) => QueueStatus::failed(name, self.id, e),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::Closed { scheduler: NAME });
        }
        self.shutdown.cancel();
        let mut registry = self.shared.registry.lock().await;
        registry.jobs.clear();
        registry.history.clear();
        tracing::info!("{}: executor {} closed", NAME, self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbridge_core::CUSTOM_SCRIPT_OPTION;
    use camino::Utf8Path;
    use tempfile::TempDir;

    async fn executor(config: LocalConfig) -> (LocalScheduler, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalConfig {
            entry_directory: Some(Utf8Path::from_path(dir.path()).unwrap().to_path_buf()),
            poll_delay_ms: 10,
            ..config
        };
        (LocalScheduler::connect(config).await.unwrap(), dir)
    }

    fn shell(script: &str) -> JobDescription {
        JobDescription {
            arguments: vec!["-c".to_string(), script.to_string()],
            ..JobDescription::new("/bin/sh")
        }
    }

    const WAIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_run_to_completion() {
        let (local, dir) = executor(LocalConfig::default()).await;
        let mut desc = shell("echo hello");
        desc.stdout = Some("out.txt".to_string());

        let job = local.submit(&desc).await.unwrap();
        assert_eq!(job.id(), "local-1");
        let status = local.wait_until_done(&job, WAIT).await.unwrap();
        assert!(status.succeeded());
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(status.state, "DONE");
        assert!(status.info.contains_key("finished"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hello\n"
        );
    }

    #[tokio::test]
    async fn test_failing_job() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let job = local.submit(&shell("exit 4")).await.unwrap();
        let status = local.wait_until_done(&job, WAIT).await.unwrap();
        assert_eq!(status.exit_code, Some(4));
        assert!(matches!(status.failure, Some(JobFailure::Error { .. })));
    }

    #[tokio::test]
    async fn test_single_queue_runs_one_at_a_time() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let first = local.submit(&shell("sleep 30")).await.unwrap();
        let second = local.submit(&shell("true")).await.unwrap();

        let status = local.wait_until_running(&first, WAIT).await.unwrap();
        assert!(status.running);
        let status = local.get_job_status(&second).await.unwrap();
        assert_eq!(status.state, "INITIAL");

        let queue = local.get_queue_status("single").await.unwrap();
        assert_eq!(queue.info["running"], "1");
        assert_eq!(queue.info["waiting"], "1");

        let status = local.cancel(&first).await.unwrap();
        assert!(status.done);
        assert!(status.failure.unwrap().is_canceled());
        assert!(local.wait_until_done(&second, WAIT).await.unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_cancel_waiting_job() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let first = local.submit(&shell("sleep 30")).await.unwrap();
        let second = local.submit(&shell("true")).await.unwrap();
        local.wait_until_running(&first, WAIT).await.unwrap();

        let status = local.cancel(&second).await.unwrap();
        assert_eq!(status.state, "ERROR");
        assert!(status.failure.unwrap().is_canceled());
        local.cancel(&first).await.unwrap();

        // Cancelling a finished job is a no-op.
        let status = local.cancel(&second).await.unwrap();
        assert!(status.done);
    }

    #[tokio::test]
    async fn test_cancel_interrupted_by_close() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let job = local.submit(&shell("sleep 30")).await.unwrap();
        local.wait_until_running(&job, WAIT).await.unwrap();

        // Detach the entry from its worker so only close() can end the wait.
        local
            .shared
            .registry
            .lock()
            .await
            .jobs
            .get_mut(job.id())
            .unwrap()
            .token = CancellationToken::new();

        let (canceled, closed) = tokio::join!(local.cancel(&job), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            local.close().await
        });
        closed.unwrap();
        assert!(matches!(canceled, Err(SchedulerError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_unlimited_runs_concurrently() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let mut desc = shell("sleep 30");
        desc.queue = Some("unlimited".to_string());
        let a = local.submit(&desc).await.unwrap();
        let b = local.submit(&desc).await.unwrap();

        assert!(local.wait_until_running(&a, WAIT).await.unwrap().running);
        assert!(local.wait_until_running(&b, WAIT).await.unwrap().running);
        assert_eq!(local.get_jobs(&["unlimited".to_string()]).await.unwrap().len(), 2);
        local.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_multi_queue_respects_workers() {
        let (local, _dir) = executor(LocalConfig {
            multi_cores: Some(2),
            ..LocalConfig::default()
        })
        .await;
        let mut desc = shell("sleep 30");
        desc.queue = Some("multi".to_string());
        let jobs = [
            local.submit(&desc).await.unwrap(),
            local.submit(&desc).await.unwrap(),
            local.submit(&desc).await.unwrap(),
        ];
        local.wait_until_running(&jobs[0], WAIT).await.unwrap();
        local.wait_until_running(&jobs[1], WAIT).await.unwrap();
        assert!(!local.get_job_status(&jobs[2]).await.unwrap().running);

        local.cancel(&jobs[0]).await.unwrap();
        assert!(local.wait_until_running(&jobs[2], WAIT).await.unwrap().running);
        local.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation() {
        let (local, _dir) = executor(LocalConfig::default()).await;

        let mut desc = shell("true");
        desc.queue = Some("batch".to_string());
        assert!(matches!(
            local.submit(&desc).await,
            Err(SchedulerError::InvalidJobDescription { .. })
        ));

        let mut desc = shell("true");
        desc.node_count = 2;
        assert!(local.submit(&desc).await.is_err());

        let mut desc = shell("true");
        desc.processes_per_node = 4;
        assert!(local.submit(&desc).await.is_err());
        desc.start_single_process = true;
        assert!(local.submit(&desc).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_script() {
        let (local, dir) = executor(LocalConfig::default()).await;
        std::fs::write(dir.path().join("job.sh"), "echo scripted > result.txt\n").unwrap();
        let mut desc = JobDescription::default();
        desc.job_options
            .insert(CUSTOM_SCRIPT_OPTION.to_string(), "job.sh".to_string());

        let job = local.submit(&desc).await.unwrap();
        assert!(local.wait_until_done(&job, WAIT).await.unwrap().succeeded());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("result.txt")).unwrap(),
            "scripted\n"
        );
    }

    #[tokio::test]
    async fn test_history_purges_finished_jobs() {
        let (local, _dir) = executor(LocalConfig {
            max_history: 2,
            ..LocalConfig::default()
        })
        .await;
        let mut jobs = Vec::new();
        for _ in 0..3 {
            let job = local.submit(&shell("true")).await.unwrap();
            local.wait_until_done(&job, WAIT).await.unwrap();
            jobs.push(job);
        }

        let err = local.get_job_status(&jobs[0]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchJob { .. }));
        assert!(local.get_job_status(&jobs[2]).await.unwrap().done);
    }

    #[tokio::test]
    async fn test_batch_status() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        let job = local.submit(&shell("true")).await.unwrap();
        local.wait_until_done(&job, WAIT).await.unwrap();
        let stranger = JobHandle::new("local-1", NAME, Uuid::new_v4(), None);
        let missing = JobHandle::new("local-99", NAME, local.id(), None);

        let statuses = local
            .get_job_statuses(&[Some(job), None, Some(stranger), Some(missing)])
            .await;
        assert!(statuses[0].as_ref().unwrap().as_ref().unwrap().done);
        assert!(statuses[1].is_none());
        assert!(matches!(
            statuses[2],
            Some(Err(SchedulerError::InvalidJobHandle { .. }))
        ));
        assert!(matches!(
            statuses[3],
            Some(Err(SchedulerError::NoSuchJob { .. }))
        ));
    }

    #[tokio::test]
    async fn test_queues_and_close() {
        let (local, _dir) = executor(LocalConfig::default()).await;
        assert_eq!(
            local.get_queue_names().await.unwrap(),
            vec!["single", "multi", "unlimited"]
        );
        assert_eq!(
            local.get_default_queue_name().await.unwrap().as_deref(),
            Some("single")
        );
        let statuses = local
            .get_queue_statuses(&["multi".to_string(), "gpu".to_string()])
            .await
            .unwrap();
        assert!(statuses[0].error.is_none());
        assert!(matches!(
            statuses[1].error,
            Some(SchedulerError::NoSuchQueue { .. })
        ));

        local.close().await.unwrap();
        assert!(matches!(
            local.close().await,
            Err(SchedulerError::Closed { .. })
        ));
        assert!(local.submit(&shell("true")).await.is_err());
    }
}
