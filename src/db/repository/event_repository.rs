use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{CreateEvent, EventRecord, SendingStatus};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    user_id, event_type, date, notify_local_time, notify_utc, last_sent_year,
    sending_status, sending_attempted_at, sending_completed_at, marked_failed_at,
    failure_reason, webhook_response_code, webhook_delivered_at, label
"#;

fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

/// Outcome of `ClaimForYear` (§4.2): either the caller now owns the event for
/// `current_year`, or another worker already claimed it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    LostRace,
}

/// Opaque keyset cursor over `(notify_utc, user_id, event_type)`. Callers must
/// treat this as an opaque token; it is only ever fed back into `query_due`.
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    after_notify_utc: Option<NaiveDateTime>,
    after_user_id: Option<String>,
    after_event_type: Option<String>,
}

impl PageCursor {
    pub fn start() -> Self {
        Self::default()
    }

    fn encode(last: &EventRecord) -> Self {
        PageCursor {
            after_notify_utc: Some(last.notify_utc),
            after_user_id: Some(last.user_id.clone()),
            after_event_type: Some(last.event_type.clone()),
        }
    }
}

pub struct DueEventsPage {
    pub events: Vec<EventRecord>,
    pub next_cursor: Option<PageCursor>,
}

/// Event store gateway (C2). All operations are typed, conditional where the
/// spec requires a compare-and-swap, and unconditional only for terminal
/// marks (§5 shared resource policy).
pub struct EventRepository;

impl EventRepository {
    pub async fn create(pool: &SqlitePool, event: CreateEvent) -> AppResult<EventRecord> {
        let row = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            INSERT INTO events (
                user_id, event_type, date, notify_local_time, notify_utc,
                last_sent_year, sending_status, label
            ) VALUES (?, ?, ?, ?, ?, 0, NULL, ?)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&event.user_id)
        .bind(&event.event_type)
        .bind(&event.date)
        .bind(&event.notify_local_time)
        .bind(event.notify_utc)
        .bind(&event.label)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn get_event(
        pool: &SqlitePool,
        user_id: &str,
        event_type: &str,
    ) -> AppResult<Option<EventRecord>> {
        let row = sqlx::query_as::<_, EventRecord>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ? AND event_type = ?"
        ))
        .bind(user_id)
        .bind(event_type)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// `QueryDue` (§4.2): the secondary index scan the scheduler and the
    /// missed-events monitor check both read through. Page size is capped by
    /// the caller (§4.3: "page size ≤ 100").
    pub async fn query_due(
        pool: &SqlitePool,
        now_utc: DateTime<Utc>,
        current_year: i64,
        cursor: &PageCursor,
        limit: i64,
    ) -> AppResult<DueEventsPage> {
        let now_naive = to_naive(now_utc);

        let events = match (&cursor.after_notify_utc, &cursor.after_user_id, &cursor.after_event_type)
        {
            (Some(notify_utc), Some(user_id), Some(event_type)) => {
                sqlx::query_as::<_, EventRecord>(&format!(
                    r#"
                    SELECT {EVENT_COLUMNS} FROM events
                    WHERE notify_utc <= ?
                      AND (last_sent_year IS NULL OR last_sent_year < ?)
                      AND (notify_utc > ? OR (notify_utc = ? AND (user_id, event_type) > (?, ?)))
                    ORDER BY notify_utc ASC, user_id ASC, event_type ASC
                    LIMIT ?
                    "#
                ))
                .bind(now_naive)
                .bind(current_year)
                .bind(*notify_utc)
                .bind(*notify_utc)
                .bind(user_id)
                .bind(event_type)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(AppError::Database)?
            }
            _ => sqlx::query_as::<_, EventRecord>(&format!(
                r#"
                SELECT {EVENT_COLUMNS} FROM events
                WHERE notify_utc <= ?
                  AND (last_sent_year IS NULL OR last_sent_year < ?)
                ORDER BY notify_utc ASC, user_id ASC, event_type ASC
                LIMIT ?
                "#
            ))
            .bind(now_naive)
            .bind(current_year)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?,
        };

        let next_cursor = events.last().map(PageCursor::encode);
        Ok(DueEventsPage { events, next_cursor })
    }

    pub async fn query_by_notify_range(
        pool: &SqlitePool,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> AppResult<Vec<EventRecord>> {
        let rows = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE notify_utc BETWEEN ? AND ?
            ORDER BY notify_utc ASC
            "#
        ))
        .bind(to_naive(from_utc))
        .bind(to_naive(to_utc))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn query_by_sending_status(
        pool: &SqlitePool,
        status: SendingStatus,
    ) -> AppResult<Vec<EventRecord>> {
        let rows = if status == SendingStatus::Pending {
            sqlx::query_as::<_, EventRecord>(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE sending_status IS NULL OR sending_status = 'pending'"
            ))
            .fetch_all(pool)
            .await
        } else {
            sqlx::query_as::<_, EventRecord>(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE sending_status = ?"
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await
        }
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// `ClaimForYear` (§4.2, §4.4 Phase 1): the sole conditional write in this
    /// gateway, and the only mutation any component may perform on an event
    /// record whose effect depends on prior state (§5).
    #[allow(clippy::too_many_arguments)]
    pub async fn claim_for_year(
        pool: &SqlitePool,
        user_id: &str,
        event_type: &str,
        current_last_sent_year: i64,
        current_year: i64,
        new_notify_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<ClaimOutcome> {
        let updated = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            UPDATE events
            SET sending_status = 'sending',
                sending_attempted_at = ?,
                last_sent_year = ?,
                notify_utc = ?
            WHERE user_id = ? AND event_type = ?
              AND last_sent_year = ?
              AND (sending_status IS NULL OR sending_status NOT IN ('sending', 'completed'))
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(to_naive(now))
        .bind(current_year)
        .bind(to_naive(new_notify_utc))
        .bind(user_id)
        .bind(event_type)
        .bind(current_last_sent_year)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(match updated {
            Some(_) => ClaimOutcome::Claimed,
            None => ClaimOutcome::LostRace,
        })
    }

    /// `MarkCompleted` (§4.2): unconditional terminal write, safe to repeat.
    pub async fn mark_completed(
        pool: &SqlitePool,
        user_id: &str,
        event_type: &str,
        response_code: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET sending_status = 'completed',
                webhook_response_code = ?,
                webhook_delivered_at = ?,
                sending_completed_at = ?
            WHERE user_id = ? AND event_type = ?
            "#,
        )
        .bind(response_code)
        .bind(to_naive(now))
        .bind(to_naive(now))
        .bind(user_id)
        .bind(event_type)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// `BatchWrite` (§4.2): creates several event records in one transaction.
    /// Used by bulk-import style callers; the per-event create path above
    /// stays the one the scheduler/sender touch.
    pub async fn batch_write(pool: &SqlitePool, events: Vec<CreateEvent>) -> AppResult<Vec<EventRecord>> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let mut written = Vec::with_capacity(events.len());

        for event in events {
            let row = sqlx::query_as::<_, EventRecord>(&format!(
                r#"
                INSERT INTO events (
                    user_id, event_type, date, notify_local_time, notify_utc,
                    last_sent_year, sending_status, label
                ) VALUES (?, ?, ?, ?, ?, 0, NULL, ?)
                RETURNING {EVENT_COLUMNS}
                "#
            ))
            .bind(&event.user_id)
            .bind(&event.event_type)
            .bind(&event.date)
            .bind(&event.notify_local_time)
            .bind(event.notify_utc)
            .bind(&event.label)
            .fetch_one(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            written.push(row);
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(written)
    }

    /// `BatchDelete` (§4.2): removes several event records in one transaction.
    pub async fn batch_delete(pool: &SqlitePool, keys: Vec<(String, String)>) -> AppResult<u64> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let mut deleted = 0u64;

        for (user_id, event_type) in keys {
            let result = sqlx::query("DELETE FROM events WHERE user_id = ? AND event_type = ?")
                .bind(&user_id)
                .bind(&event_type)
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(deleted)
    }

    /// `MarkFailed` (§4.2): unconditional; also used to unstick a record
    /// stuck in `sending` (§4.4 pre-step, §4.6 stuck-events check).
    pub async fn mark_failed(
        pool: &SqlitePool,
        user_id: &str,
        event_type: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET sending_status = 'failed',
                marked_failed_at = ?,
                failure_reason = ?
            WHERE user_id = ? AND event_type = ?
            "#,
        )
        .bind(to_naive(now))
        .bind(reason)
        .bind(user_id)
        .bind(event_type)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
