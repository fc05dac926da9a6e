use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use greeter_service::clock::{Clock, FixedClock};
use greeter_service::db::models::{CreateEvent, SendingStatus};
use greeter_service::db::repository::{EventRepository, UserRepository};
use greeter_service::error::AppError;
use greeter_service::queue::{GreeterMessage, QueueGateway, SqliteQueueGateway};
use greeter_service::services::{dlq_processor, sender};
use greeter_service::webhook::{DeliveryOutcome, NotificationPayload, WebhookClient};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

/// A `WebhookClient` double: a queue of canned status codes consumed in
/// order (the last one repeats once exhausted), plus a recorded call log and
/// a toggleable health flag for the DLQ processor's probe.
struct StubWebhook {
    inner: Mutex<StubInner>,
}

struct StubInner {
    responses: Vec<u16>,
    calls: Vec<(String, String)>,
    healthy: bool,
}

impl StubWebhook {
    fn new(responses: Vec<u16>) -> Self {
        StubWebhook {
            inner: Mutex::new(StubInner {
                responses,
                calls: Vec::new(),
                healthy: true,
            }),
        }
    }

    async fn call_count(&self) -> usize {
        self.inner.lock().await.calls.len()
    }

    async fn set_healthy(&self, healthy: bool) {
        self.inner.lock().await.healthy = healthy;
    }
}

#[async_trait]
impl WebhookClient for StubWebhook {
    async fn deliver(
        &self,
        payload: &NotificationPayload,
        idempotency_key: &str,
    ) -> Result<DeliveryOutcome, AppError> {
        let mut inner = self.inner.lock().await;
        inner
            .calls
            .push((idempotency_key.to_string(), payload.message.clone()));
        let code = if inner.responses.len() > 1 {
            inner.responses.remove(0)
        } else {
            *inner.responses.first().unwrap_or(&200)
        };
        Ok(DeliveryOutcome {
            status_code: code,
            success: code == 200,
        })
    }

    async fn probe(&self) -> Result<(), AppError> {
        if self.inner.lock().await.healthy {
            Ok(())
        } else {
            Err(AppError::ServiceUnavailable("webhook down".to_string()))
        }
    }
}

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

async fn seed_ada(pool: &SqlitePool, notify_utc: chrono::DateTime<Utc>) {
    UserRepository::upsert(pool, "user-1", "Ada", "Lovelace", "UTC")
        .await
        .unwrap();
    EventRepository::create(
        pool,
        CreateEvent {
            user_id: "user-1".to_string(),
            event_type: "birthday".to_string(),
            date: "1990-06-15".to_string(),
            notify_local_time: "09:00".to_string(),
            notify_utc: notify_utc.naive_utc(),
            label: None,
        },
    )
    .await
    .unwrap();
}

fn ada_message(year_now: i64, last_sent_year: i64) -> GreeterMessage {
    GreeterMessage {
        id: "user-1".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        timezone: "UTC".to_string(),
        pk: "USER#user-1".to_string(),
        sk: "EVENT#birthday".to_string(),
        event_type: "birthday".to_string(),
        event_date: "1990-06-15".to_string(),
        notify_local_time: "09:00".to_string(),
        last_sent_year,
        year_now,
    }
}

// S1 — happy path: scheduler enqueues, sender delivers and completes.
#[tokio::test]
async fn s1_happy_path_delivers_once_and_advances_the_record() {
    let pool = setup_pool().await;
    let reference = utc(2026, 6, 15, 9, 0, 0);
    seed_ada(&pool, reference).await;

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(reference));
    let queue = SqliteQueueGateway::new(pool.clone());

    let counters = greeter_service::services::scheduler::run_sweep(&pool, &queue, clock.as_ref(), 100).await;
    assert_eq!(counters.processed, 1);
    assert_eq!(counters.enqueue_failures, 0);

    let received = queue.receive(10, std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload.dedup_key(), "user-1-birthday-2026");

    let webhook = StubWebhook::new(vec![200]);
    let outcome = sender::process_message(&pool, &webhook, clock.as_ref(), Duration::minutes(5), &received[0].payload)
        .await
        .unwrap();
    assert_eq!(outcome, sender::SenderOutcome::Delivered);
    assert_eq!(webhook.call_count().await, 1);

    let record = EventRepository::get_event(&pool, "user-1", "birthday")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), SendingStatus::Completed);
    assert_eq!(record.last_sent_year, 2026);
    assert_eq!(record.notify_utc, utc(2027, 6, 15, 9, 0, 0).naive_utc());
}

// S2 — duplicate prevention: the sender observes the same message twice.
#[tokio::test]
async fn s2_duplicate_message_is_dropped_after_first_delivery() {
    let pool = setup_pool().await;
    let reference = utc(2026, 6, 15, 9, 0, 0);
    seed_ada(&pool, reference).await;

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(reference));
    let webhook = StubWebhook::new(vec![200]);
    let message = ada_message(2026, 0);

    let first = sender::process_message(&pool, &webhook, clock.as_ref(), Duration::minutes(5), &message)
        .await
        .unwrap();
    assert_eq!(first, sender::SenderOutcome::Delivered);

    let second = sender::process_message(&pool, &webhook, clock.as_ref(), Duration::minutes(5), &message)
        .await
        .unwrap();
    assert_eq!(second, sender::SenderOutcome::Dropped("duplicate"));
    assert_eq!(webhook.call_count().await, 1, "only one outbound POST ever happens");
}

// S3 — webhook outage routes the message to the DLQ, recovers once healthy.
#[tokio::test]
async fn s3_webhook_outage_routes_to_dlq_then_recovers_on_redrive() {
    let pool = setup_pool().await;
    let reference = utc(2026, 6, 15, 9, 0, 0);
    seed_ada(&pool, reference).await;

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(reference));
    let queue = SqliteQueueGateway::new(pool.clone());
    let message = ada_message(2026, 0);
    queue
        .enqueue(message.group_key(), &message.dedup_key(), &message)
        .await
        .unwrap();

    let down_webhook = StubWebhook::new(vec![503]);

    // Redeliver up to MAX_RECEIVE_COUNT; each attempt claims (Phase 1
    // advances last_sent_year) but fails delivery, leaving the record failed.
    for _ in 0..3 {
        let received = queue.receive(1, std::time::Duration::from_millis(0)).await.unwrap();
        assert_eq!(received.len(), 1);
        let result = sender::process_message(
            &pool,
            &down_webhook,
            clock.as_ref(),
            Duration::minutes(5),
            &received[0].payload,
        )
        .await;
        assert!(result.is_err(), "webhook outage must surface as retriable");
    }

    // The 4th receive attempt (past MAX_RECEIVE_COUNT) routes the message to the DLQ.
    let received_after_limit = queue.receive(1, std::time::Duration::from_millis(0)).await.unwrap();
    assert!(received_after_limit.is_empty());
    assert_eq!(queue.dlq_depth().await.unwrap(), 1);

    let record = EventRepository::get_event(&pool, "user-1", "birthday")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), SendingStatus::Failed);
    assert_eq!(record.last_sent_year, 2026, "Phase 1 already advanced before the webhook failed");

    // Webhook recovers; the DLQ processor probes health and redrives.
    let recovered_webhook = StubWebhook::new(vec![200]);
    let counters = dlq_processor::run_once(&queue, &recovered_webhook, 10).await;
    assert_eq!(counters.redriven, 1);
    assert_eq!(queue.dlq_depth().await.unwrap(), 0);

    let redelivered = queue.receive(1, std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    let outcome = sender::process_message(
        &pool,
        &recovered_webhook,
        clock.as_ref(),
        Duration::minutes(5),
        &redelivered[0].payload,
    )
    .await
    .unwrap();
    assert_eq!(outcome, sender::SenderOutcome::Delivered);

    let record = EventRepository::get_event(&pool, "user-1", "birthday")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), SendingStatus::Completed);
    assert_eq!(recovered_webhook.call_count().await, 1, "exactly one successful side effect");
}

// S4 — crash between Phase 1 and Phase 3 leaves the record stuck; the
// pre-step recovery path promotes it to failed and lets the retry through.
#[tokio::test]
async fn s4_stuck_sending_record_is_recovered_and_redelivered_once() {
    let pool = setup_pool().await;
    let claim_time = utc(2026, 6, 15, 9, 0, 0);
    seed_ada(&pool, claim_time).await;

    // Simulate a crash mid-delivery: claim succeeds, but nothing completes it.
    let next_year_instant = greeter_service::time_resolver::next_notify_utc(
        6, 15, "UTC", "09:00", claim_time,
    )
    .unwrap();
    let claim = EventRepository::claim_for_year(&pool, "user-1", "birthday", 0, 2026, next_year_instant, claim_time)
        .await
        .unwrap();
    assert_eq!(claim, greeter_service::db::repository::ClaimOutcome::Claimed);

    // Six minutes later (past STUCK_TIMEOUT_SENDER = 5 min), a redelivery arrives.
    let later = claim_time + Duration::minutes(6);
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(later));
    let webhook = StubWebhook::new(vec![200]);
    let message = ada_message(2026, 0);

    let outcome = sender::process_message(&pool, &webhook, clock.as_ref(), Duration::minutes(5), &message)
        .await
        .unwrap();
    assert_eq!(outcome, sender::SenderOutcome::Delivered);
    assert_eq!(webhook.call_count().await, 1);

    let record = EventRepository::get_event(&pool, "user-1", "birthday")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), SendingStatus::Completed);
}

// S5 — timezone edge: Pacific/Auckland, UTC date differs from local date.
#[tokio::test]
async fn s5_timezone_edge_advances_correctly_across_date_boundary() {
    let pool = setup_pool().await;
    let reference = utc(2026, 12, 31, 19, 0, 0);

    UserRepository::upsert(&pool, "user-2", "Kate", "Sheppard", "Pacific/Auckland")
        .await
        .unwrap();
    let notify_utc =
        greeter_service::time_resolver::next_notify_utc(12, 31, "Pacific/Auckland", "09:00", reference - Duration::days(365))
            .unwrap();
    EventRepository::create(
        &pool,
        CreateEvent {
            user_id: "user-2".to_string(),
            event_type: "birthday".to_string(),
            date: "1990-12-31".to_string(),
            notify_local_time: "09:00".to_string(),
            notify_utc,
            label: None,
        },
    )
    .await
    .unwrap();

    let clock: Arc<dyn Clock> = Arc::new(FixedClock(reference));
    let webhook = StubWebhook::new(vec![200]);
    let message = GreeterMessage {
        id: "user-2".to_string(),
        first_name: "Kate".to_string(),
        last_name: "Sheppard".to_string(),
        timezone: "Pacific/Auckland".to_string(),
        pk: "USER#user-2".to_string(),
        sk: "EVENT#birthday".to_string(),
        event_type: "birthday".to_string(),
        event_date: "1990-12-31".to_string(),
        notify_local_time: "09:00".to_string(),
        last_sent_year: 0,
        year_now: 2026,
    };

    let outcome = sender::process_message(&pool, &webhook, clock.as_ref(), Duration::minutes(5), &message)
        .await
        .unwrap();
    assert_eq!(outcome, sender::SenderOutcome::Delivered);

    let record = EventRepository::get_event(&pool, "user-2", "birthday")
        .await
        .unwrap()
        .unwrap();
    assert!(record.notify_utc > reference.naive_utc());
}

// S6 — DST ambiguity: successive advances across America/New_York's spring
// forward stay strictly increasing and land on the intended wall clock.
#[tokio::test]
async fn s6_dst_spring_forward_advance_is_monotonic() {
    let before_dst = utc(2026, 1, 1, 0, 0, 0);
    let first = greeter_service::time_resolver::next_notify_utc(3, 8, "America/New_York", "09:00", before_dst).unwrap();
    let second = greeter_service::time_resolver::next_notify_utc(3, 8, "America/New_York", "09:00", first).unwrap();
    assert!(second > first);
}
