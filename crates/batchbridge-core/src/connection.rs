//! A scheduler connection driven by a [`Dialect`].
//!
//! Status queries consult the sources in a fixed order:
//! 1. the live listing (one query per call, shared by every job asked about);
//! 2. the accounting store, for jobs missing from the listing;
//! 3. the deleted-before-visible flag, reported once;
//! 4. the grace window, which keeps recently seen jobs pending;
//! 5. otherwise the job does not exist.

use async_trait::async_trait;
use batchbridge_parsers::{CommandError, CommandOutput, CommandRunner, Record, Records};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::dialect::{CancelOutcome, Classified, CommandLine, Dialect, JobState, ServerInfo, Submission};
use crate::error::{Result, SchedulerError};
use crate::path;
use crate::reconcile::Reconciler;
use crate::scheduler::Scheduler;
use crate::types::{JobDescription, JobFailure, JobHandle, JobStatus, QueueStatus, UNKNOWN_STATE};
use crate::validate::{self, Rules};

/// State string of a job reported as deleted before it became visible.
pub const DELETED_STATE: &str = "DELETED";

const DELETED_REASON: &str = "deleted while pending";

/// The failure of a terminal record whose job was deleted before any listing
/// showed it. The delete is the cause unless the record names one.
fn attribute(failure: Option<JobFailure>, canceled: bool) -> Option<JobFailure> {
    match failure {
        None if canceled => Some(JobFailure::canceled(DELETED_REASON)),
        failure => failure,
    }
}

/// A job the listing showed in an error state; it has been deleted and is
/// reported failed unless accounting says more.
struct Errored {
    native: String,
    failure: JobFailure,
    info: Record,
}

pub struct SchedulerConnection<D: Dialect> {
    dialect: D,
    runner: Arc<dyn CommandRunner>,
    config: ConnectionConfig,
    id: Uuid,
    entry: Utf8PathBuf,
    server: ServerInfo,
    state: Mutex<Reconciler>,
    closed: AtomicBool,
}

impl<D: Dialect> SchedulerConnection<D> {
    /// Probe the server, discover the entry directory and set up empty
    /// reconciler state.
    pub async fn connect(
        dialect: D,
        runner: Arc<dyn CommandRunner>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let name = dialect.name();
        let probe = dialect.probe_command();
        tracing::debug!("{}: probing server with {}", name, probe);
        let output = runner
            .run(probe.stdin.as_deref(), &probe.program, &probe.args)
            .await
            .map_err(|e| SchedulerError::command(name, e))?;
        let mut server = dialect.check_server(&output, config.ignore_version)?;
        if config.disable_accounting {
            server.accounting = false;
        }

        let entry = match &config.entry_directory {
            Some(dir) => dir.clone(),
            None => {
                let output = runner
                    .run_checked(None, "pwd", &[])
                    .await
                    .map_err(|e| SchedulerError::command(name, e))?;
                Utf8PathBuf::from(output.stdout.trim())
            }
        };

        let id = Uuid::new_v4();
        tracing::info!(
            "{}: connected (version {}, accounting {}, entry {}) as {}",
            name,
            server.version.as_deref().unwrap_or("unknown"),
            server.accounting,
            entry,
            id
        );

        Ok(Self {
            state: Mutex::new(Reconciler::new(config.accounting_grace())),
            dialect,
            runner,
            config,
            id,
            entry,
            server,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn entry_directory(&self) -> &Utf8Path {
        &self.entry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::Closed {
                scheduler: self.dialect.name(),
            });
        }
        Ok(())
    }

    fn check_handle(&self, job: &JobHandle) -> Result<()> {
        if job.scheduler_id() != self.id {
            return Err(SchedulerError::InvalidJobHandle {
                scheduler: self.dialect.name(),
                job_id: job.id().to_string(),
            });
        }
        Ok(())
    }

    fn command_error(&self, e: CommandError) -> SchedulerError {
        SchedulerError::command(self.dialect.name(), e)
    }

    async fn execute(&self, command: &CommandLine) -> std::result::Result<CommandOutput, CommandError> {
        tracing::debug!("{}: running {}", self.dialect.name(), command);
        self.runner
            .run(command.stdin.as_deref(), &command.program, &command.args)
            .await
    }

    async fn execute_checked(
        &self,
        command: &CommandLine,
    ) -> std::result::Result<CommandOutput, CommandError> {
        tracing::debug!("{}: running {}", self.dialect.name(), command);
        self.runner
            .run_checked(command.stdin.as_deref(), &command.program, &command.args)
            .await
    }

    async fn listing(&self, queues: &[String]) -> Result<Records> {
        let command = self.dialect.listing_command(queues, &self.server);
        let output = self
            .execute_checked(&command)
            .await
            .map_err(|e| self.command_error(e))?;
        let records = self
            .dialect
            .parse_listing(&output.stdout, self.config.ignore_version)?;
        self.state
            .lock()
            .await
            .observe_listing(records.keys().map(String::as_str));
        Ok(records)
    }

    /// The live listing, or `None` when the command failed this round.
    async fn listing_if_available(&self) -> Result<Option<Records>> {
        match self.listing(&[]).await {
            Ok(records) => Ok(Some(records)),
            Err(SchedulerError::CommandFailed { source, .. }) => {
                tracing::warn!("{}: live listing unavailable: {}", self.dialect.name(), source);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Accounting records for `ids`. Command failures leave jobs out.
    async fn accounting(&self, ids: &[&str]) -> Result<Records> {
        let name = self.dialect.name();
        let mut records = Records::new();
        if ids.is_empty() {
            return Ok(records);
        }

        let batches: Vec<Vec<&str>> = if self.dialect.batch_accounting(&self.server) {
            vec![ids.to_vec()]
        } else {
            ids.iter().map(|id| vec![*id]).collect()
        };

        for batch in batches {
            let Some(command) = self.dialect.accounting_command(&batch, &self.server) else {
                break;
            };
            let output = match self.execute(&command).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!("{}: accounting unavailable: {}", name, e);
                    continue;
                }
            };
            if !output.success() {
                if !self.dialect.accounting_missing(&output) {
                    tracing::warn!(
                        "{}: {} failed with exit code {:?}: {}",
                        name,
                        command,
                        output.exit_code,
                        output.stderr.trim()
                    );
                }
                continue;
            }
            let parsed = self
                .dialect
                .parse_accounting(&output.stdout, &self.server)
                .map_err(|e| SchedulerError::parse(name, "accounting output", e))?;
            records.extend(parsed);
        }

        Ok(records)
    }

    /// Delete a job the scheduler reports in an error state.
    async fn delete_errored(&self, id: &str) {
        let command = self.dialect.cancel_command(id);
        match self.execute(&command).await {
            Ok(output) if self.dialect.parse_cancel(&output).is_some() => {}
            Ok(output) => tracing::warn!(
                "{}: could not delete job {} in error state: {}",
                self.dialect.name(),
                id,
                output.stderr.trim()
            ),
            Err(e) => tracing::warn!(
                "{}: could not delete job {} in error state: {}",
                self.dialect.name(),
                id,
                e
            ),
        }
    }

    /// Compute the status of each id. `consume_deleted` controls whether a
    /// deleted-before-visible flag is used up when neither the listing nor
    /// accounting knows the job. A terminal record always uses it up.
    async fn resolve(&self, ids: &[&str], consume_deleted: bool) -> Vec<Result<JobStatus>> {
        if ids.is_empty() {
            return Vec::new();
        }
        let name = self.dialect.name();

        let listing = match self.listing_if_available().await {
            Ok(listing) => listing,
            Err(e) => return ids.iter().map(|_| Err(e.clone())).collect(),
        };

        let mut results: Vec<Option<Result<JobStatus>>> = vec![None; ids.len()];
        let mut unresolved: Vec<(usize, Option<Errored>)> = Vec::new();

        for (slot, &id) in ids.iter().enumerate() {
            let Some(record) = listing.as_ref().and_then(|records| records.get(id)) else {
                unresolved.push((slot, None));
                continue;
            };
            let Classified { native, state } = match self.dialect.classify_listed(record) {
                Ok(classified) => classified,
                Err(e) => {
                    results[slot] = Some(Err(SchedulerError::parse(name, "listing record", e)));
                    continue;
                }
            };
            let status = match state {
                JobState::Pending => JobStatus::pending(id, native),
                JobState::Running => JobStatus::running(id, native),
                JobState::Finished { exit_code, failure } => {
                    let canceled = self.state.lock().await.settle(id);
                    JobStatus::finished(id, native, exit_code, attribute(failure, canceled))
                }
                JobState::Error { detail } => {
                    tracing::warn!("{}: job {} is in error state {}, deleting it", name, id, native);
                    self.delete_errored(id).await;
                    let failure = JobFailure::error(format!("job {id} in error state {native}: {detail}"));
                    unresolved.push((
                        slot,
                        Some(Errored {
                            native,
                            failure,
                            info: record.clone(),
                        }),
                    ));
                    continue;
                }
            };
            results[slot] = Some(Ok(status.with_info(record.clone())));
        }

        let missing: Vec<&str> = unresolved.iter().map(|(slot, _)| ids[*slot]).collect();
        let accounting = match self.accounting(&missing).await {
            Ok(records) => records,
            Err(e) => {
                for (slot, _) in &unresolved {
                    results[*slot] = Some(Err(e.clone()));
                }
                unresolved.clear();
                Records::new()
            }
        };

        for (slot, errored) in unresolved {
            let id = ids[slot];
            let status = match accounting.get(id) {
                Some(record) => self.from_accounting(id, record, errored).await,
                None => self.from_bookkeeping(id, errored, consume_deleted).await,
            };
            results[slot] = Some(status);
        }

        results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| result.unwrap_or_else(|| Err(SchedulerError::no_such_job(name, *id))))
            .collect()
    }

    async fn from_accounting(
        &self,
        id: &str,
        record: &Record,
        errored: Option<Errored>,
    ) -> Result<JobStatus> {
        let name = self.dialect.name();
        let Classified { native, state } = self
            .dialect
            .classify_accounting(record)
            .map_err(|e| SchedulerError::parse(name, "accounting record", e))?;

        let (native, exit_code, failure) = match (state, errored) {
            (JobState::Finished { exit_code, failure }, errored) => {
                let failure = errored.map(|errored| errored.failure).or(failure);
                (native, exit_code, failure)
            }
            (JobState::Error { detail }, errored) => {
                let failure = errored
                    .map(|errored| errored.failure)
                    .unwrap_or_else(|| JobFailure::error(detail));
                (native, None, Some(failure))
            }
            (_, Some(errored)) => (errored.native, None, Some(errored.failure)),
            (JobState::Running, None) => return Ok(JobStatus::running(id, native).with_info(record.clone())),
            (JobState::Pending, None) => return Ok(JobStatus::pending(id, native).with_info(record.clone())),
        };

        let canceled = self.state.lock().await.settle(id);
        Ok(
            JobStatus::finished(id, native, exit_code, attribute(failure, canceled))
                .with_info(record.clone()),
        )
    }

    async fn from_bookkeeping(
        &self,
        id: &str,
        errored: Option<Errored>,
        consume_deleted: bool,
    ) -> Result<JobStatus> {
        let mut state = self.state.lock().await;

        if let Some(errored) = errored {
            state.mark_done(id);
            return Ok(
                JobStatus::finished(id, errored.native, None, Some(errored.failure))
                    .with_info(errored.info),
            );
        }

        let deleted = if consume_deleted {
            state.take_deleted(id)
        } else {
            state.is_deleted(id)
        };
        if deleted {
            state.mark_done(id);
            return Ok(JobStatus::finished(
                id,
                DELETED_STATE,
                None,
                Some(JobFailure::canceled(DELETED_REASON)),
            ));
        }

        if state.recently_seen(id) {
            return Ok(JobStatus::unknown_pending(id));
        }

        Err(SchedulerError::no_such_job(self.dialect.name(), id))
    }

    async fn queue_records(&self) -> Result<Records> {
        let command = self.dialect.queues_command();
        let output = self
            .execute_checked(&command)
            .await
            .map_err(|e| self.command_error(e))?;
        self.dialect
            .parse_queues(&output.stdout)
            .map_err(|e| SchedulerError::parse(self.dialect.name(), "queue listing", e))
    }
}

#[async_trait]
impl<D: Dialect> Scheduler for SchedulerConnection<D> {
    fn name(&self) -> &'static str {
        self.dialect.name()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn poll_delay(&self) -> Duration {
        self.config.poll_delay(self.dialect.poll_delay())
    }

    async fn submit(&self, description: &JobDescription) -> Result<JobHandle> {
        self.ensure_open()?;
        let name = self.dialect.name();

        let rules = Rules {
            scheduler: name,
            job_options: self.dialect.job_options(),
            has_default_runtime: self.dialect.has_default_runtime(),
            interactive_allowed: false,
        };
        validate::verify(description, &rules, |desc| self.dialect.validate(desc))?;

        let submission = match description.custom_script() {
            Some(script) => {
                let dir =
                    path::working_directory(&self.entry, description.working_directory.as_deref());
                Submission::Existing(path::resolve(&dir, script))
            }
            None => Submission::Generated(self.dialect.generate_script(description, &self.entry)),
        };

        let command = self.dialect.submit_command(submission);
        let output = self
            .execute_checked(&command)
            .await
            .map_err(|e| self.command_error(e))?;
        let id = self
            .dialect
            .parse_submit(&output.stdout)
            .map_err(|e| SchedulerError::parse(name, "submit output", e))?;

        self.state.lock().await.register(&id);
        tracing::info!("{}: submitted job {}", name, id);
        Ok(JobHandle::new(id, name, self.id, Some(description.clone())))
    }

    async fn cancel(&self, job: &JobHandle) -> Result<JobStatus> {
        self.ensure_open()?;
        self.check_handle(job)?;
        let id = job.id();

        let command = self.dialect.cancel_command(id);
        let output = self
            .execute(&command)
            .await
            .map_err(|e| self.command_error(e))?;
        let Some(outcome) = self.dialect.parse_cancel(&output) else {
            return Err(self.command_error(CommandError::Failed {
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }));
        };

        {
            let mut state = self.state.lock().await;
            match outcome {
                CancelOutcome::DeletedWhilePending => state.mark_deleted(id),
                CancelOutcome::Terminating if !state.was_listed(id) && !state.is_done(id) => {
                    state.mark_deleted(id)
                }
                _ => {}
            }
        }
        tracing::info!("{}: cancelled job {} ({:?})", self.dialect.name(), id, outcome);

        match self.resolve(&[id], false).await.pop() {
            Some(Err(SchedulerError::NoSuchJob { .. })) | None
                if outcome == CancelOutcome::AlreadyFinished =>
            {
                Ok(JobStatus::finished(id, UNKNOWN_STATE, None, None))
            }
            Some(result) => result,
            None => Err(SchedulerError::no_such_job(self.dialect.name(), id)),
        }
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        self.ensure_open()?;
        self.check_handle(job)?;
        self.resolve(&[job.id()], true)
            .await
            .pop()
            .unwrap_or_else(|| Err(SchedulerError::no_such_job(self.dialect.name(), job.id())))
    }

    async fn get_job_statuses(&self, jobs: &[Option<JobHandle>]) -> Vec<Option<Result<JobStatus>>> {
        if let Err(e) = self.ensure_open() {
            return jobs
                .iter()
                .map(|job| job.as_ref().map(|_| Err(e.clone())))
                .collect();
        }

        let mut ids = Vec::new();
        let mut rejected = Vec::with_capacity(jobs.len());
        for job in jobs.iter().flatten() {
            match self.check_handle(job) {
                Ok(()) => {
                    ids.push(job.id());
                    rejected.push(None);
                }
                Err(e) => rejected.push(Some(e)),
            }
        }

        let mut resolved = self.resolve(&ids, true).await.into_iter();
        let mut rejected = rejected.into_iter();
        jobs.iter()
            .map(|job| {
                let job = job.as_ref()?;
                Some(match rejected.next().flatten() {
                    Some(e) => Err(e),
                    None => resolved.next().unwrap_or_else(|| {
                        Err(SchedulerError::no_such_job(self.dialect.name(), job.id()))
                    }),
                })
            })
            .collect()
    }

    async fn get_jobs(&self, queues: &[String]) -> Result<Vec<JobHandle>> {
        self.ensure_open()?;
        let records = self.listing(queues).await?;
        Ok(records
            .into_keys()
            .map(|id| JobHandle::new(id, self.dialect.name(), self.id, None))
            .collect())
    }

    async fn get_queue_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let command = self.dialect.queue_names_command();
        let output = self
            .execute_checked(&command)
            .await
            .map_err(|e| self.command_error(e))?;
        self.dialect
            .parse_queue_names(&output.stdout)
            .map_err(|e| SchedulerError::parse(self.dialect.name(), "queue names", e))
    }

    async fn get_default_queue_name(&self) -> Result<Option<String>> {
        self.ensure_open()?;
        if !self.dialect.has_default_queue() {
            return Ok(None);
        }
        let records = self.queue_records().await?;
        Ok(self.dialect.default_queue(&records))
    }

    async fn get_queue_status(&self, queue: &str) -> Result<QueueStatus> {
        self.ensure_open()?;
        let mut records = self.queue_records().await?;
        match records.remove(queue) {
            Some(info) => Ok(QueueStatus::new(queue, self.id, info)),
            None => Err(SchedulerError::no_such_queue(self.dialect.name(), queue)),
        }
    }

    async fn get_queue_statuses(&self, queues: &[String]) -> Result<Vec<QueueStatus>> {
        self.ensure_open()?;
        let mut records = self.queue_records().await?;
        if queues.is_empty() {
            return Ok(records
                .into_iter()
                .map(|(name, info)| QueueStatus::new(name, self.id, info))
                .collect());
        }
        Ok(queues
            .iter()
            .map(|queue| match records.remove(queue) {
                Some(info) => QueueStatus::new(queue, self.id, info),
                None => QueueStatus::failed(
                    queue,
                    self.id,
                    SchedulerError::no_such_queue(self.dialect.name(), queue),
                ),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::Closed {
                scheduler: self.dialect.name(),
            });
        }
        self.state.lock().await.clear();
        self.runner.close().await.map_err(|e| self.command_error(e))?;
        tracing::info!("{}: connection {} closed", self.dialect.name(), self.id);
        Ok(())
    }
}
