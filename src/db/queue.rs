use std::collections::HashSet;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::AppError;
use crate::models::{OpKind, QueueEntry, TaskDraft};

/// Durable FIFO log of mutations awaiting remote confirmation.
///
/// `seq` comes from an AUTOINCREMENT key, so it only ever grows, even across
/// removals and restarts. Coalescing rewrites an entry's operation and payload
/// under its existing `seq`, so an entry never moves in replay order.
#[derive(Clone)]
pub struct OperationQueue {
    db: SqlitePool,
}

impl OperationQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        op: OpKind,
        target_id: i64,
        payload: Option<&TaskDraft>,
    ) -> Result<i64, AppError> {
        let mut conn = self.db.acquire().await?;
        push(&mut conn, op, target_id, payload).await
    }

    /// All entries in replay order.
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, AppError> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "SELECT seq, op, target_id, payload, enqueued_at FROM sync_queue ORDER BY seq ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(entries)
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.db)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn remove(&self, seq: i64) -> Result<bool, AppError> {
        let mut conn = self.db.acquire().await?;
        drop_entry(&mut conn, seq).await
    }

    pub async fn clear(&self) -> Result<u64, AppError> {
        let removed = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(removed)
    }

    /// The live entry targeting `target_id`, if any.
    pub async fn find_for(&self, target_id: i64) -> Result<Option<QueueEntry>, AppError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT seq, op, target_id, payload, enqueued_at
            FROM sync_queue
            WHERE target_id = ?1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(entry)
    }

    pub async fn pending_targets(&self) -> Result<HashSet<i64>, AppError> {
        let targets = sqlx::query_scalar::<_, i64>("SELECT DISTINCT target_id FROM sync_queue")
            .fetch_all(&self.db)
            .await?;
        Ok(targets.into_iter().collect())
    }

    pub async fn min_target(&self) -> Result<Option<i64>, AppError> {
        let min = sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(target_id) FROM sync_queue")
            .fetch_one(&self.db)
            .await?;
        Ok(min)
    }
}

/// Append an entry on an open connection or transaction; returns its `seq`.
pub async fn push(
    conn: &mut SqliteConnection,
    op: OpKind,
    target_id: i64,
    payload: Option<&TaskDraft>,
) -> Result<i64, AppError> {
    let payload = payload.map(serde_json::to_string).transpose()?;
    let now = Utc::now().to_rfc3339();

    let seq = sqlx::query(
        r#"
        INSERT INTO sync_queue (op, target_id, payload, enqueued_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(op)
    .bind(target_id)
    .bind(payload)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(seq)
}

/// Replace the operation and payload of entry `seq`, keeping its position.
pub async fn rewrite(
    conn: &mut SqliteConnection,
    seq: i64,
    op: OpKind,
    payload: Option<&TaskDraft>,
) -> Result<bool, AppError> {
    let payload = payload.map(serde_json::to_string).transpose()?;

    let changed = sqlx::query("UPDATE sync_queue SET op = ?1, payload = ?2 WHERE seq = ?3")
        .bind(op)
        .bind(payload)
        .bind(seq)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(changed > 0)
}

pub async fn drop_entry(conn: &mut SqliteConnection, seq: i64) -> Result<bool, AppError> {
    let removed = sqlx::query("DELETE FROM sync_queue WHERE seq = ?1")
        .bind(seq)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed > 0)
}
