//! Job row storage
//!
//! Raw SQL for the durable queue. Policy (backoff, retention, events) lives
//! in `queue`; this module only knows rows. Reservation is a single UPDATE
//! with a RETURNING clause so two workers can never claim the same job.

use chrono::{DateTime, Utc};
use spotforge_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_ts, ts};
use crate::models::{Job, JobKind, JobStatus};

pub async fn insert(pool: &SqlitePool, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, queue, production_id, payload, status, attempts, max_attempts,
            progress, last_error, last_error_kind, result, reserved_by,
            created_at, completed_at, next_run_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, NULL, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.kind.queue_name())
    .bind(job.payload.production_id().to_string())
    .bind(serde_json::to_string(&job.payload)?)
    .bind(job.status.as_str())
    .bind(job.attempts as i64)
    .bind(job.max_attempts as i64)
    .bind(job.progress as i64)
    .bind(&job.last_error)
    .bind(&job.last_error_kind)
    .bind(job.result.as_ref().map(|v| v.to_string()))
    .bind(ts(job.created_at))
    .bind(ts(job.next_run_at))
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let queue: String = row.get("queue");
    let kind = JobKind::parse(&queue)
        .ok_or_else(|| Error::Internal(format!("unknown queue '{}'", queue)))?;
    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("unknown job status '{}'", status)))?;
    let id: String = row.get("id");
    let payload: String = row.get("payload");
    let result: Option<String> = row.get("result");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad job id: {}", e)))?,
        kind,
        payload: serde_json::from_str(&payload)?,
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        last_error: row.get("last_error"),
        last_error_kind: row.get("last_error_kind"),
        result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        next_run_at: parse_ts(row.get::<String, _>("next_run_at").as_str())?,
    })
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Job> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => row_to_job(&row),
        None => Err(Error::NotFound(format!("job {}", id))),
    }
}

/// Atomically claim the oldest ready job on a queue: marks it RUNNING and
/// increments its attempt counter in the same statement.
pub async fn reserve(
    pool: &SqlitePool,
    kind: JobKind,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>> {
    let row = sqlx::query(
        r#"
        UPDATE jobs SET
            status = 'RUNNING',
            attempts = attempts + 1,
            reserved_by = ?
        WHERE id = (
            SELECT id FROM jobs
            WHERE queue = ? AND status = 'PENDING' AND next_run_at <= ?
            ORDER BY next_run_at ASC, created_at ASC
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(worker_id)
    .bind(kind.queue_name())
    .bind(ts(now))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_job).transpose()
}

pub async fn mark_completed(
    pool: &SqlitePool,
    id: Uuid,
    result: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'COMPLETED', progress = 100, result = ?, completed_at = ? WHERE id = ? AND status = 'RUNNING'",
    )
    .bind(result.to_string())
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal failure: no further attempts.
pub async fn mark_failed(pool: &SqlitePool, id: Uuid, error: &str, kind: &str) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'FAILED', last_error = ?, last_error_kind = ?, completed_at = ? WHERE id = ? AND status = 'RUNNING'",
    )
    .bind(error)
    .bind(kind)
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Put a failed job back on the queue tail with a backoff delay.
pub async fn reschedule(
    pool: &SqlitePool,
    id: Uuid,
    error: &str,
    kind: &str,
    next_run_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'PENDING', last_error = ?, last_error_kind = ?, reserved_by = NULL, next_run_at = ? WHERE id = ? AND status = 'RUNNING'",
    )
    .bind(error)
    .bind(kind)
    .bind(ts(next_run_at))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_progress(pool: &SqlitePool, id: Uuid, percent: u8) -> Result<()> {
    sqlx::query("UPDATE jobs SET progress = MAX(progress, ?) WHERE id = ? AND status = 'RUNNING'")
        .bind(percent.min(100) as i64)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_cancelled(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'CANCELLED', completed_at = ? WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
    )
    .bind(ts(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Cancel every non-terminal job belonging to a production.
pub async fn cancel_for_production(pool: &SqlitePool, production_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'CANCELLED', completed_at = ? WHERE production_id = ? AND status IN ('PENDING', 'RUNNING')",
    )
    .bind(ts(Utc::now()))
    .bind(production_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Retention: keep the newest `keep` terminal jobs per status on a queue and
/// nothing older than `cutoff`.
pub async fn prune(
    pool: &SqlitePool,
    kind: JobKind,
    status: JobStatus,
    keep: u32,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM jobs WHERE queue = ? AND status = ? AND (
            completed_at < ?
            OR id NOT IN (
                SELECT id FROM jobs
                WHERE queue = ? AND status = ?
                ORDER BY completed_at DESC
                LIMIT ?
            )
        )
        "#,
    )
    .bind(kind.queue_name())
    .bind(status.as_str())
    .bind(ts(cutoff))
    .bind(kind.queue_name())
    .bind(status.as_str())
    .bind(keep as i64)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
