//! Worker pools over the durable queues
//!
//! One pool per job kind: bounded concurrency, a start-rate limit, and
//! cooperative cancellation. Workers are plain tasks that reserve, run the
//! kind's handler under the stage ceiling, and report the outcome back to
//! the queue.

use futures::future::BoxFuture;
use governor::{Quota, RateLimiter};
use spotforge_common::{Error, Result};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::JobQueue;
use crate::db::productions;
use crate::models::{Job, JobKind};

/// Per-queue pool tuning
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Bounded concurrency N
    pub concurrency: usize,
    /// Max M job starts per 60-second window
    pub starts_per_minute: u32,
    /// Idle poll interval when the queue is empty
    pub poll_interval: Duration,
}

impl WorkerPoolConfig {
    /// Suggested defaults per stage.
    pub fn for_kind(kind: JobKind) -> Self {
        let (concurrency, starts_per_minute) = match kind {
            JobKind::ScriptGeneration => (5, 10),
            JobKind::TtsGeneration => (3, 5),
            JobKind::MusicGeneration => (2, 5),
            JobKind::AudioMixing => (2, 5),
        };
        Self {
            concurrency,
            starts_per_minute,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Hard ceiling for one handler invocation. Exceeding it yields a retryable
/// TIMEOUT; the queue downgrades the second consecutive one to STAGE_STUCK.
pub fn stage_ceiling(kind: JobKind) -> Duration {
    match kind {
        JobKind::ScriptGeneration => Duration::from_secs(30),
        JobKind::TtsGeneration => Duration::from_secs(180),
        JobKind::MusicGeneration => Duration::from_secs(300),
        // Covers trim/loop, analysis, ducking, two mix passes and the
        // post-mix stretch with their own per-call toolchain timeouts
        JobKind::AudioMixing => Duration::from_secs(600),
    }
}

/// Shared registry of per-production cancellation tokens.
///
/// `cancel` trips the token; in-flight workers observe it at their next
/// suspension point and abort the provider call.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    /// Token for a production, created on first use.
    pub fn token(&self, production_id: Uuid) -> CancellationToken {
        let mut map = self.inner.lock().expect("cancel registry poisoned");
        map.entry(production_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    pub fn cancel(&self, production_id: Uuid) {
        self.token(production_id).cancel();
    }

    /// Drop a production's token once it reaches a terminal state.
    pub fn remove(&self, production_id: Uuid) {
        let mut map = self.inner.lock().expect("cancel registry poisoned");
        map.remove(&production_id);
    }
}

/// Context handed to a handler for one job invocation
pub struct WorkerContext {
    queue: JobQueue,
    job: Job,
    /// Trips when the owning production is cancelled
    pub cancel: CancellationToken,
}

impl WorkerContext {
    pub fn new(queue: JobQueue, job: Job, cancel: CancellationToken) -> Self {
        Self { queue, job, cancel }
    }

    /// Fire-and-forget progress report for the running job.
    pub async fn progress(&self, percent: u8) {
        if let Err(e) = self.queue.progress(&self.job, percent).await {
            tracing::debug!(job_id = %self.job.id, error = %e, "progress update dropped");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A stage's job executor
pub trait JobHandler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        job: &'a Job,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Bounded worker pool for one queue
pub struct WorkerPool {
    queue: JobQueue,
    kind: JobKind,
    config: WorkerPoolConfig,
    handler: Arc<dyn JobHandler>,
    cancels: CancelRegistry,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        kind: JobKind,
        config: WorkerPoolConfig,
        handler: Arc<dyn JobHandler>,
        cancels: CancelRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            kind,
            config,
            handler,
            cancels,
            shutdown,
        }
    }

    /// Spawn the pool's worker tasks; returns their join handles.
    pub fn spawn(self) -> Vec<tokio::task::JoinHandle<()>> {
        let rate = NonZeroU32::new(self.config.starts_per_minute.max(1))
            .expect("rate limit is non-zero");
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rate)));

        let mut handles = Vec::with_capacity(self.config.concurrency);
        for slot in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let kind = self.kind;
            let handler = Arc::clone(&self.handler);
            let cancels = self.cancels.clone();
            let shutdown = self.shutdown.clone();
            let limiter = Arc::clone(&limiter);
            let poll_interval = self.config.poll_interval;
            let worker_id = format!("{}-{}", kind.queue_name(), slot);

            handles.push(tokio::spawn(async move {
                tracing::debug!(worker = %worker_id, "worker started");
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    let job = match queue.reserve(kind, &worker_id).await {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(worker = %worker_id, error = %e, "reserve failed");
                            tokio::time::sleep(poll_interval).await;
                            continue;
                        }
                    };

                    // The rate limit gates job starts, not idle polls
                    limiter.until_ready().await;
                    run_one(&queue, &handler, &cancels, &worker_id, job).await;
                }
                tracing::debug!(worker = %worker_id, "worker stopped");
            }));
        }
        handles
    }
}

async fn run_one(
    queue: &JobQueue,
    handler: &Arc<dyn JobHandler>,
    cancels: &CancelRegistry,
    worker_id: &str,
    job: Job,
) {
    let production_id = job.payload.production_id();

    // A production cancelled while this job sat in the queue never runs.
    match productions::status_of(queue.pool(), production_id).await {
        Ok(Some((status, _))) if status == "CANCELLED" => {
            if let Err(e) = queue.cancel(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to cancel stale job");
            }
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "production status probe failed");
        }
    }

    let cancel = cancels.token(production_id);
    let ctx = WorkerContext::new(queue.clone(), job.clone(), cancel.clone());
    let ceiling = stage_ceiling(job.kind);

    tracing::info!(
        worker = %worker_id,
        job_id = %job.id,
        production_id = %production_id,
        attempt = job.attempts,
        "job started"
    );

    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(ceiling, handler.handle(&job, &ctx)) => Some(
            match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout(format!(
                    "{} exceeded its {}s ceiling",
                    job.kind,
                    ceiling.as_secs()
                ))),
            }
        ),
    };

    match outcome {
        None => {
            tracing::info!(job_id = %job.id, production_id = %production_id, "job cancelled mid-flight");
            if let Err(e) = queue.cancel(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to mark job cancelled");
            }
        }
        Some(Ok(result)) => {
            if let Err(e) = queue.complete(&job, result).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to record completion");
            }
        }
        Some(Err(error)) => {
            if let Err(e) = queue.fail(&job, &error).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to record failure");
            }
        }
    }
}
