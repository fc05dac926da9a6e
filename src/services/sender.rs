//! Sender state machine (C5): the system's correctness core. Runs a
//! three-phase claim/deliver/complete protocol against the event store for
//! each received queue message, guaranteeing at most one successful outbound
//! webhook call per (event, year) (§4.4).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::models::SendingStatus;
use crate::db::repository::{ClaimOutcome, EventRepository};
use crate::error::{AppError, AppResult};
use crate::queue::{GreeterMessage, QueueGateway, ReceivedMessage};
use crate::webhook::{NotificationPayload, WebhookClient};

/// Terminal, non-error outcomes of processing one message. A `Retriable`
/// error (returned as `Err`) means the caller must leave the message
/// un-acknowledged so the transport redelivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderOutcome {
    Delivered,
    Dropped(&'static str),
}

fn as_utc(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

/// Runs the full claim/deliver/complete protocol for one message. Returns
/// `Ok(Dropped(_))`/`Ok(Delivered)` for terminal, non-retriable outcomes, and
/// `Err` for anything the transport should redeliver.
pub async fn process_message(
    pool: &SqlitePool,
    webhook: &dyn WebhookClient,
    clock: &dyn Clock,
    stuck_timeout: Duration,
    message: &GreeterMessage,
) -> AppResult<SenderOutcome> {
    let now = clock.now();

    let Some(record) = EventRepository::get_event(pool, &message.id, &message.event_type).await?
    else {
        tracing::info!(user_id = %message.id, event_type = %message.event_type, "event missing, dropping message");
        return Ok(SenderOutcome::Dropped("event missing"));
    };

    // Duplicate guard: both clauses are required (Design Note §9) — dropping
    // the status clause would make a Phase-3 failure on retry look like a
    // duplicate and block recovery.
    if record.last_sent_year >= message.year_now && record.status() == SendingStatus::Completed {
        tracing::info!(user_id = %message.id, event_type = %message.event_type, "duplicate delivery, dropping");
        return Ok(SenderOutcome::Dropped("duplicate"));
    }

    if record.status() == SendingStatus::Sending {
        if let Some(attempted_at) = record.sending_attempted_at {
            let elapsed = now - as_utc(attempted_at);
            if elapsed < stuck_timeout {
                tracing::info!(user_id = %message.id, event_type = %message.event_type, "claimed by another worker, dropping");
                return Ok(SenderOutcome::Dropped("claimed by another worker"));
            }
            tracing::warn!(
                user_id = %message.id,
                event_type = %message.event_type,
                "event stuck in sending state, marking failed before re-claim"
            );
            EventRepository::mark_failed(
                pool,
                &message.id,
                &message.event_type,
                "Stuck in sending state — likely webhook timeout or crash",
                now,
            )
            .await?;
        }
    }

    // Phase 1 — Claim.
    let (month, day) = record.anniversary_month_day().ok_or_else(|| {
        AppError::Validation(format!("unparseable event date: {}", record.date))
    })?;
    let next_notify_utc = crate::time_resolver::resolve_for_year(
        month,
        day,
        message.year_now as i32 + 1,
        &message.timezone,
        &message.notify_local_time,
    )
    .map_err(|e| AppError::Validation(e.to_string()))?;

    let claim = EventRepository::claim_for_year(
        pool,
        &message.id,
        &message.event_type,
        record.last_sent_year,
        message.year_now,
        next_notify_utc,
        now,
    )
    .await?;

    if claim == ClaimOutcome::LostRace {
        tracing::info!(user_id = %message.id, event_type = %message.event_type, "lost claim race, dropping");
        return Ok(SenderOutcome::Dropped("lost claim race"));
    }

    // Phase 2 — Deliver.
    let payload = NotificationPayload::greeting(&message.first_name, &message.last_name, &message.event_type);
    let idempotency_key = message.idempotency_key();
    let delivery = webhook.deliver(&payload, &idempotency_key).await;

    let outcome = match delivery {
        Ok(outcome) if outcome.success => outcome,
        Ok(outcome) => {
            let reason = format!("webhook responded {}", outcome.status_code);
            let _ = EventRepository::mark_failed(pool, &message.id, &message.event_type, &reason, clock.now()).await;
            return Err(AppError::ServiceUnavailable(reason));
        }
        Err(e) => {
            let reason = format!("webhook delivery failed: {e}");
            let _ = EventRepository::mark_failed(pool, &message.id, &message.event_type, &reason, clock.now()).await;
            return Err(AppError::ServiceUnavailable(reason));
        }
    };

    // Phase 3 — Complete. A failure here must not raise: delivery already
    // happened, and the stuck-event detector reconciles the stale record.
    if let Err(e) = EventRepository::mark_completed(
        pool,
        &message.id,
        &message.event_type,
        outcome.status_code as i64,
        clock.now(),
    )
    .await
    {
        tracing::error!(
            user_id = %message.id,
            event_type = %message.event_type,
            error = %e,
            "failed to persist completion after successful delivery"
        );
    }

    Ok(SenderOutcome::Delivered)
}

async fn handle_one(
    pool: &SqlitePool,
    queue: &dyn QueueGateway,
    webhook: &dyn WebhookClient,
    clock: &dyn Clock,
    stuck_timeout: Duration,
    received: ReceivedMessage,
) {
    match process_message(pool, webhook, clock, stuck_timeout, &received.payload).await {
        Ok(outcome) => {
            tracing::info!(id = %received.id, ?outcome, "message processed");
            if let Err(e) = queue.delete(&received.id).await {
                tracing::warn!(id = %received.id, error = %e, "failed to delete processed message");
            }
        }
        Err(e) => {
            tracing::warn!(
                id = %received.id,
                receive_count = received.receive_count,
                error = %e,
                "message processing failed, leaving for redelivery"
            );
        }
    }
}

/// Spawns `worker_count` independent polling loops against the queue
/// gateway, mirroring this codebase's existing claim-then-dispatch retry
/// worker shape.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    pool: SqlitePool,
    queue: Arc<dyn QueueGateway>,
    webhook: Arc<dyn WebhookClient>,
    clock: Arc<dyn Clock>,
    worker_count: u32,
    poll_interval: StdDuration,
    stuck_timeout: Duration,
    shutdown: &tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count.max(1))
        .map(|worker_id| {
            let pool = pool.clone();
            let queue = queue.clone();
            let webhook = webhook.clone();
            let clock = clock.clone();
            let mut shutdown_rx = shutdown.subscribe();

            tokio::spawn(async move {
                loop {
                    let claimed = match queue.receive(1, poll_interval.max(StdDuration::from_secs(30))).await {
                        Ok(claimed) => claimed,
                        Err(e) => {
                            tracing::warn!(worker_id, error = %e, "sender poll failed");
                            Vec::new()
                        }
                    };

                    if claimed.is_empty() {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                tracing::info!(worker_id, "sender worker shutting down");
                                break;
                            }
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                        continue;
                    }

                    for received in claimed {
                        if shutdown_rx.try_recv().is_ok() {
                            tracing::info!(worker_id, "sender worker shutting down mid-batch");
                            return;
                        }
                        handle_one(&pool, queue.as_ref(), webhook.as_ref(), clock.as_ref(), stuck_timeout, received)
                            .await;
                    }
                }
            })
        })
        .collect()
}
