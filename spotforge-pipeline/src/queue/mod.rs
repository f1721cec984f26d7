//! Durable job queue
//!
//! Queue policy over the job rows in `db::jobs`: retry with jittered
//! exponential backoff, the timeout-to-stuck downgrade, retention pruning,
//! and lifecycle events on the shared bus.

pub mod worker;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use spotforge_common::{Error, ErrorKind, EventBus, PipelineEvent, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::jobs as job_rows;
use crate::models::{EnqueueOptions, Job, JobKind, JobPayload, JobStatus};

/// Backoff base for retried jobs
const RETRY_BASE: Duration = Duration::from_secs(2);
/// Retention: completed jobs kept per queue
const KEEP_COMPLETED: u32 = 100;
/// Retention: failed jobs kept per queue
const KEEP_FAILED: u32 = 200;
/// Retention: nothing older than this many hours survives
const RETENTION_HOURS: i64 = 24;

/// Jittered exponential backoff: base 2 s, doubled per attempt, with up to
/// 50% random stretch so retry storms decorrelate.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8);
    let base = RETRY_BASE * 2u32.pow(exponent);
    let jitter = rand::thread_rng().gen_range(1.0..1.5);
    base.mul_f64(jitter)
}

/// Handle to the durable queues
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    events: EventBus,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, events: EventBus) -> Self {
        Self { pool, events }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Add a job to its kind's queue; returns the job id.
    pub async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> Result<Uuid> {
        let now = Utc::now();
        let next_run_at = match options.delay {
            Some(delay) => now + ChronoDuration::from_std(delay).unwrap_or_default(),
            None => now,
        };
        let job = Job {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: options.max_attempts.max(1),
            progress: 0,
            last_error: None,
            last_error_kind: None,
            result: None,
            created_at: now,
            completed_at: None,
            next_run_at,
        };
        job_rows::insert(&self.pool, &job).await?;
        tracing::debug!(job_id = %job.id, queue = %job.kind, "job enqueued");
        Ok(job.id)
    }

    /// Atomically claim the oldest ready job on a queue.
    pub async fn reserve(&self, kind: JobKind, worker_id: &str) -> Result<Option<Job>> {
        job_rows::reserve(&self.pool, kind, worker_id, Utc::now()).await
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        job_rows::get(&self.pool, job_id).await
    }

    /// Mark a job finished and store its result document.
    pub async fn complete(&self, job: &Job, result: serde_json::Value) -> Result<()> {
        job_rows::mark_completed(&self.pool, job.id, &result).await?;
        self.events.emit_lossy(PipelineEvent::JobCompleted {
            queue: job.kind.queue_name().to_string(),
            job_id: job.id,
            timestamp: Utc::now(),
        });
        self.prune(job.kind).await;
        Ok(())
    }

    /// Record a failure. Retryable errors re-enqueue with backoff until the
    /// attempt budget is spent; a second consecutive timeout downgrades to
    /// STAGE_STUCK and fails terminally. Returns whether the job will retry.
    pub async fn fail(&self, job: &Job, error: &Error) -> Result<bool> {
        let repeated_timeout = matches!(error.kind(), ErrorKind::Timeout)
            && job.last_error_kind.as_deref() == Some(ErrorKind::Timeout.as_str());

        let (kind, message) = if repeated_timeout {
            (
                ErrorKind::StageStuck,
                format!("two consecutive timeouts: {}", error),
            )
        } else {
            (error.kind(), error.to_string())
        };

        let retryable =
            !repeated_timeout && error.is_retryable() && job.attempts < job.max_attempts;

        if retryable {
            let delay = backoff_delay(job.attempts);
            let next_run_at = Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default();
            job_rows::reschedule(&self.pool, job.id, &message, kind.as_str(), next_run_at).await?;
            tracing::warn!(
                job_id = %job.id,
                queue = %job.kind,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "job failed, retry scheduled"
            );
        } else {
            job_rows::mark_failed(&self.pool, job.id, &message, kind.as_str()).await?;
            tracing::error!(
                job_id = %job.id,
                queue = %job.kind,
                attempts = job.attempts,
                error = %message,
                "job failed terminally"
            );
        }

        self.events.emit_lossy(PipelineEvent::JobFailed {
            queue: job.kind.queue_name().to_string(),
            job_id: job.id,
            error: message,
            will_retry: retryable,
            timestamp: Utc::now(),
        });
        self.prune(job.kind).await;
        Ok(retryable)
    }

    /// Non-blocking progress report; ordered per worker, lossy overall.
    pub async fn progress(&self, job: &Job, percent: u8) -> Result<()> {
        job_rows::set_progress(&self.pool, job.id, percent).await?;
        self.events.emit_lossy(PipelineEvent::JobProgress {
            queue: job.kind.queue_name().to_string(),
            job_id: job.id,
            percent,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        job_rows::mark_cancelled(&self.pool, job_id).await
    }

    /// Cancel all non-terminal jobs of a production.
    pub async fn cancel_production_jobs(&self, production_id: Uuid) -> Result<u64> {
        job_rows::cancel_for_production(&self.pool, production_id).await
    }

    /// Poll a job until it reaches a terminal status.
    pub async fn wait(&self, job_id: Uuid, cancel: &CancellationToken) -> Result<Job> {
        loop {
            let job = self.get(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(self.get(job_id).await?);
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Retention pass for one queue. Failures here only log; pruning never
    /// interferes with the job that triggered it.
    async fn prune(&self, kind: JobKind) {
        let cutoff = Utc::now() - ChronoDuration::hours(RETENTION_HOURS);
        for (status, keep) in [
            (JobStatus::Completed, KEEP_COMPLETED),
            (JobStatus::Failed, KEEP_FAILED),
        ] {
            if let Err(e) = job_rows::prune(&self.pool, kind, status, keep, cutoff).await {
                tracing::warn!(queue = %kind, error = %e, "retention pruning failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_jitters() {
        let first = backoff_delay(1);
        let second = backoff_delay(2);
        let third = backoff_delay(3);
        assert!(first >= Duration::from_secs(2));
        assert!(first < Duration::from_secs(3));
        assert!(second >= Duration::from_secs(4));
        assert!(second < Duration::from_secs(6));
        assert!(third >= Duration::from_secs(8));
        assert!(third < Duration::from_secs(12));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // Attempt numbers far beyond the budget must not overflow
        let delay = backoff_delay(100);
        assert!(delay <= Duration::from_secs(2 * 256 * 2));
    }
}
