use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::message::GreeterMessage;

/// Maximum redeliveries from the main queue before a message is routed to the
/// DLQ instead of being handed back to a receiver (§4.5).
pub const MAX_RECEIVE_COUNT: i64 = 3;

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub payload: GreeterMessage,
    pub receive_count: i64,
}

#[derive(Debug, Clone)]
pub struct ReceivedDlqMessage {
    pub id: String,
    pub dedup_key: Option<String>,
    pub group_key: String,
    pub payload: GreeterMessage,
}

/// C3: the queue gateway. Emulates a FIFO-per-group, content-deduplicated
/// transport with visibility timeout and a DLQ, over plain SQLite (§6.2).
/// Abstracted behind a trait per Design Note §9 so the sender/scheduler/DLQ
/// processor can be exercised against an in-memory fake in unit tests without
/// a pool, while integration tests use the real `SqliteQueueGateway`.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Enqueue onto the main queue. Returns `false` if `dedup_key` collided
    /// with an existing, still-live entry (content-based dedup, §6.2).
    async fn enqueue(&self, group_key: &str, dedup_key: &str, payload: &GreeterMessage) -> AppResult<bool>;

    /// Claim up to `max_messages` visible messages from the main queue,
    /// leasing them for `visibility_timeout`. A message whose `receive_count`
    /// would exceed `MAX_RECEIVE_COUNT` is moved to the DLQ instead of being
    /// returned (§4.5).
    async fn receive(
        &self,
        max_messages: i64,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<ReceivedMessage>>;

    /// Acknowledge and remove a message from the main queue.
    async fn delete(&self, id: &str) -> AppResult<()>;

    async fn depth(&self) -> AppResult<i64>;

    async fn dlq_depth(&self) -> AppResult<i64>;

    /// Receive up to `max_messages` from the DLQ, without leasing (the DLQ is
    /// only ever drained by the single DLQ processor loop, §4.5).
    async fn dlq_receive(&self, max_messages: i64) -> AppResult<Vec<ReceivedDlqMessage>>;

    async fn dlq_delete(&self, id: &str) -> AppResult<()>;
}

pub struct SqliteQueueGateway {
    pool: SqlitePool,
}

impl SqliteQueueGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueGateway for SqliteQueueGateway {
    async fn enqueue(&self, group_key: &str, dedup_key: &str, payload: &GreeterMessage) -> AppResult<bool> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let body = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to serialize queue message: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO greeter_queue (id, dedup_key, group_key, payload, enqueued_at, visible_at, receive_count)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&id)
        .bind(dedup_key)
        .bind(group_key)
        .bind(&body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn receive(
        &self,
        max_messages: i64,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<ReceivedMessage>> {
        let mut claimed = Vec::new();
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        let now = Utc::now().naive_utc();

        let candidates: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, payload, receive_count FROM greeter_queue
            WHERE visible_at <= ?
            ORDER BY group_key ASC, enqueued_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(max_messages)
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        for (id, body, receive_count) in candidates {
            let next_count = receive_count + 1;
            if next_count > MAX_RECEIVE_COUNT {
                move_to_dlq(&mut tx, &id).await?;
                continue;
            }

            let visible_at = (Utc::now() + chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)))
            .naive_utc();

            sqlx::query(
                "UPDATE greeter_queue SET receive_count = ?, visible_at = ? WHERE id = ?",
            )
            .bind(next_count)
            .bind(visible_at)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            let payload: GreeterMessage = serde_json::from_str(&body).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("corrupt queue payload for {id}: {e}"))
            })?;

            claimed.push(ReceivedMessage {
                id,
                payload,
                receive_count: next_count,
            });
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(claimed)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM greeter_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn depth(&self) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM greeter_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(count)
    }

    async fn dlq_depth(&self) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM greeter_dlq")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(count)
    }

    async fn dlq_receive(&self, max_messages: i64) -> AppResult<Vec<ReceivedDlqMessage>> {
        let rows: Vec<(String, Option<String>, String, String)> = sqlx::query_as(
            r#"
            SELECT id, dedup_key, group_key, payload FROM greeter_dlq
            ORDER BY moved_at ASC
            LIMIT ?
            "#,
        )
        .bind(max_messages)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter()
            .map(|(id, dedup_key, group_key, body)| {
                let payload: GreeterMessage = serde_json::from_str(&body).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("corrupt DLQ payload for {id}: {e}"))
                })?;
                Ok(ReceivedDlqMessage {
                    id,
                    dedup_key,
                    group_key,
                    payload,
                })
            })
            .collect()
    }

    async fn dlq_delete(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM greeter_dlq WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}

async fn move_to_dlq(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, id: &str) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO greeter_dlq (id, dedup_key, group_key, payload, enqueued_at, moved_at, receive_count)
        SELECT id, dedup_key, group_key, payload, enqueued_at, ?, receive_count FROM greeter_queue WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(AppError::Database)?;

    sqlx::query("DELETE FROM greeter_queue WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(AppError::Database)?;

    Ok(())
}
