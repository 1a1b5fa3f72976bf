//! The uniform interface every scheduler connection exposes.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{JobDescription, JobHandle, JobStatus, QueueStatus};

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Dialect name.
    fn name(&self) -> &'static str;

    /// Identifier of this connection; carried by every handle it issues.
    fn id(&self) -> Uuid;

    /// Delay between polls in the wait loops.
    fn poll_delay(&self) -> Duration;

    async fn submit(&self, description: &JobDescription) -> Result<JobHandle>;

    /// Kill or delete a job and return its status afterwards.
    async fn cancel(&self, job: &JobHandle) -> Result<JobStatus>;

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus>;

    /// Status of several jobs from a single listing query.
    ///
    /// Empty slots stay empty; failures are reported per slot.
    async fn get_job_statuses(&self, jobs: &[Option<JobHandle>]) -> Vec<Option<Result<JobStatus>>>;

    /// Jobs currently in the given queues, or in all queues if none are given.
    async fn get_jobs(&self, queues: &[String]) -> Result<Vec<JobHandle>>;

    async fn get_queue_names(&self) -> Result<Vec<String>>;

    async fn get_default_queue_name(&self) -> Result<Option<String>>;

    async fn get_queue_status(&self, queue: &str) -> Result<QueueStatus>;

    /// Status of the given queues, or of all queues if none are given.
    /// Unknown queues carry an error instead of failing the call.
    async fn get_queue_statuses(&self, queues: &[String]) -> Result<Vec<QueueStatus>>;

    /// Release the transport. Every later call fails.
    async fn close(&self) -> Result<()>;

    /// Poll until the job is done. A zero timeout waits forever.
    async fn wait_until_done(&self, job: &JobHandle, timeout: Duration) -> Result<JobStatus> {
        self.wait_until_done_cancellable(job, timeout, &CancellationToken::new())
            .await
    }

    /// Poll until the job is running or done. A zero timeout waits forever.
    async fn wait_until_running(&self, job: &JobHandle, timeout: Duration) -> Result<JobStatus> {
        self.wait_until_running_cancellable(job, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`Scheduler::wait_until_done`], returning the last status seen
    /// once `token` is cancelled.
    async fn wait_until_done_cancellable(
        &self,
        job: &JobHandle,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<JobStatus> {
        poll_until(self, job, timeout, token, |status| status.done).await
    }

    async fn wait_until_running_cancellable(
        &self,
        job: &JobHandle,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<JobStatus> {
        poll_until(self, job, timeout, token, |status| status.running || status.done).await
    }
}

/// Query at least once, then sleep and re-query until `reached` holds, the
/// deadline passes or `token` is cancelled.
async fn poll_until<S>(
    scheduler: &S,
    job: &JobHandle,
    timeout: Duration,
    token: &CancellationToken,
    reached: fn(&JobStatus) -> bool,
) -> Result<JobStatus>
where
    S: Scheduler + ?Sized,
{
    let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

    loop {
        let status = scheduler.get_job_status(job).await?;
        if reached(&status) {
            return Ok(status);
        }

        let mut delay = scheduler.poll_delay();
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Ok(status);
            }
            delay = delay.min(deadline - now);
        }

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Wait for job {} cancelled", job.id());
                return Ok(status);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
