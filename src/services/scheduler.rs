//! Scheduler loop (C4): sweeps the due-events index and enqueues one greeter
//! message per due event. Never mutates the event record — idempotency of the
//! outbound side effect is owned entirely by the sender (C5).

use std::sync::Arc;

use chrono::Datelike;
use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::db::repository::{EventRepository, PageCursor, UserRepository};
use crate::queue::{GreeterMessage, QueueGateway};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepCounters {
    pub processed: u64,
    pub enqueue_failures: u64,
    pub pages: u64,
}

/// One full sweep of the due-events index (§4.3). `now` and `current_year`
/// are captured once by the caller and held constant for the whole sweep.
pub async fn run_sweep(
    pool: &SqlitePool,
    queue: &dyn QueueGateway,
    clock: &dyn Clock,
    page_size: i64,
) -> SweepCounters {
    let now = clock.now();
    let current_year = now.year() as i64;
    let mut counters = SweepCounters::default();
    let mut cursor = PageCursor::start();

    loop {
        let page = match EventRepository::query_due(pool, now, current_year, &cursor, page_size).await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "due-events page read failed, aborting sweep");
                break;
            }
        };

        if page.events.is_empty() {
            break;
        }
        counters.pages += 1;

        for event in &page.events {
            match UserRepository::get_user(pool, &event.user_id).await {
                Ok(Some(user)) => {
                    let message = GreeterMessage {
                        id: event.user_id.clone(),
                        first_name: user.first_name.clone(),
                        last_name: user.last_name.clone(),
                        timezone: user.timezone.clone(),
                        pk: format!("USER#{}", event.user_id),
                        sk: format!("EVENT#{}", event.event_type),
                        event_type: event.event_type.clone(),
                        event_date: event.date.clone(),
                        notify_local_time: event.notify_local_time.clone(),
                        last_sent_year: event.last_sent_year,
                        year_now: current_year,
                    };
                    let dedup_key = format!("{}-{}-{}", event.user_id, event.event_type, current_year);

                    match queue.enqueue(message.group_key(), &dedup_key, &message).await {
                        Ok(_) => counters.processed += 1,
                        Err(e) => {
                            counters.enqueue_failures += 1;
                            tracing::warn!(
                                user_id = %event.user_id,
                                event_type = %event.event_type,
                                error = %e,
                                "failed to enqueue due event"
                            );
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!(user_id = %event.user_id, "due event's owning user is missing, skipping");
                }
                Err(e) => {
                    counters.enqueue_failures += 1;
                    tracing::warn!(user_id = %event.user_id, error = %e, "user lookup failed, skipping");
                }
            }
        }

        match page.next_cursor {
            Some(next) if page.events.len() as i64 == page_size => cursor = next,
            _ => break,
        }
    }

    counters
}

/// Spawns the periodic sweep as a background task, following the shape of
/// this codebase's other `tokio::spawn`-plus-`tokio::select!` workers.
pub fn spawn(
    pool: SqlitePool,
    queue: Arc<dyn QueueGateway>,
    clock: Arc<dyn Clock>,
    sweep_interval: std::time::Duration,
    page_size: i64,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let counters = run_sweep(&pool, queue.as_ref(), clock.as_ref(), page_size).await;
            tracing::info!(
                processed = counters.processed,
                enqueue_failures = counters.enqueue_failures,
                pages = counters.pages,
                "scheduler sweep complete"
            );

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("scheduler worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(sweep_interval) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_default_to_zero() {
        let counters = SweepCounters::default();
        assert_eq!(counters.processed, 0);
        assert_eq!(counters.enqueue_failures, 0);
        assert_eq!(counters.pages, 0);
    }
}
