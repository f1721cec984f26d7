//! Database access for the pipeline
//!
//! One SQLite pool per process. The schema is created on startup with
//! `CREATE TABLE IF NOT EXISTS`; productions and jobs serialize structured
//! payloads as JSON columns and timestamps as fixed-width RFC 3339 text so
//! that lexicographic ordering in SQL matches chronological ordering.

pub mod jobs;
pub mod productions;

use chrono::{DateTime, SecondsFormat, Utc};
use spotforge_common::{Error, Result};
use sqlx::SqlitePool;

/// Connect to the durable store and initialize the schema.
pub async fn init_pool(url: &str) -> Result<SqlitePool> {
    // Ensure the parent directory exists for file-backed databases
    if let Some(path) = url
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
    {
        if path != ":memory:" && !path.is_empty() {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
    }

    tracing::debug!(url, "connecting to durable store");
    let pool = SqlitePool::connect(url).await?;
    initialize_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes the pipeline needs.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS productions (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            error_kind TEXT,
            error_message TEXT,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            production_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            progress INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_error_kind TEXT,
            result TEXT,
            reserved_by TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            next_run_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_queue_status ON jobs(queue, status, next_run_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_production ON jobs(production_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_productions_status ON productions(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Fixed-width RFC 3339 timestamp (millisecond precision, `Z` suffix).
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp '{}': {}", s, e)))
}
