use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

/// `GetUser` (§4.2). Collocated with the event repository since both operate
/// on the same SQLite pool and the same user key-space described in §6.1.
pub struct UserRepository;

impl UserRepository {
    pub async fn get_user(pool: &SqlitePool, user_id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, first_name, last_name, timezone, created_at, updated_at
            FROM users
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// User CRUD is out of scope for this service's own API; this exists so
    /// tests and scenario fixtures can seed users directly. The CRUD surface
    /// that normally performs this write lives in a separate service (§1).
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        first_name: &str,
        last_name: &str,
        timezone: &str,
    ) -> AppResult<User> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, first_name, last_name, timezone, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                timezone = excluded.timezone,
                updated_at = excluded.updated_at
            RETURNING user_id, first_name, last_name, timezone, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(timezone)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
