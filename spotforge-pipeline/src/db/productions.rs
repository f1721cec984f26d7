//! Production persistence

use spotforge_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_ts, ts};
use crate::models::Production;

/// Upsert a production. The full record is the `body` JSON document;
/// status, progress and error columns are mirrored for queries.
pub async fn save(pool: &SqlitePool, production: &Production) -> Result<()> {
    let body = serde_json::to_string(production)?;
    sqlx::query(
        r#"
        INSERT INTO productions (
            id, owner_id, status, progress, error_kind, error_message,
            body, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            progress = excluded.progress,
            error_kind = excluded.error_kind,
            error_message = excluded.error_message,
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(production.id.to_string())
    .bind(&production.owner_id)
    .bind(production.status.as_str())
    .bind(production.progress as i64)
    .bind(&production.error_kind)
    .bind(&production.error_message)
    .bind(body)
    .bind(ts(production.created_at))
    .bind(ts(production.updated_at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load(pool: &SqlitePool, id: Uuid) -> Result<Option<Production>> {
    let row = sqlx::query("SELECT body FROM productions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let body: String = row.get("body");
            Ok(Some(serde_json::from_str(&body)?))
        }
        None => Ok(None),
    }
}

/// Load or fail with NotFound.
pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Production> {
    load(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("production {}", id)))
}

/// Ids of productions waiting for an orchestrator, oldest first.
pub async fn pending_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        "SELECT id FROM productions WHERE status = 'PENDING' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        ids.push(
            Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad id '{}': {}", id, e)))?,
        );
    }
    Ok(ids)
}

/// Cheap status probe without deserializing the whole body.
pub async fn status_of(pool: &SqlitePool, id: Uuid) -> Result<Option<(String, u8)>> {
    let row = sqlx::query("SELECT status, progress, updated_at FROM productions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let status: String = row.get("status");
            let progress: i64 = row.get("progress");
            // Parse eagerly so corrupt rows surface here, not downstream
            let _updated = parse_ts(row.get::<String, _>("updated_at").as_str())?;
            Ok(Some((status, progress.clamp(0, 100) as u8)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductionSettings;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let pool = memory_pool().await;
        let production =
            Production::new("owner-1", "Promote a coffee brand", "warm", ProductionSettings::default());
        save(&pool, &production).await.unwrap();

        let loaded = get(&pool, production.id).await.unwrap();
        assert_eq!(loaded.id, production.id);
        assert_eq!(loaded.prompt, "Promote a coffee brand");
        assert_eq!(loaded.status, production.status);
    }

    #[tokio::test]
    async fn upsert_overwrites_mutable_fields() {
        let pool = memory_pool().await;
        let mut production =
            Production::new("owner-1", "p", "warm", ProductionSettings::default());
        save(&pool, &production).await.unwrap();

        production.set_progress(40);
        production.add_warning("analysis fell back to the synthetic grid");
        save(&pool, &production).await.unwrap();

        let loaded = get(&pool, production.id).await.unwrap();
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[tokio::test]
    async fn missing_production_is_not_found() {
        let pool = memory_pool().await;
        let err = get(&pool, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
