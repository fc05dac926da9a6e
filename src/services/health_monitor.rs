//! Health monitor (C7): the missed-events and stuck-events reconciliation
//! pass (§4.6). Its latest report is held in a shared `RwLock` slot and
//! served read-only over `GET /health`.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::db::models::SendingStatus;
use crate::db::repository::EventRepository;

#[derive(Debug, Clone, Serialize)]
pub struct MissedEvent {
    pub user_id: String,
    pub event_type: String,
    pub hours_overdue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StuckEvent {
    pub user_id: String,
    pub event_type: String,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub missed_count: usize,
    pub stuck_count: usize,
    pub missed: Vec<MissedEvent>,
    pub stuck: Vec<StuckEvent>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    fn empty(timestamp: DateTime<Utc>) -> Self {
        HealthReport {
            status: HealthStatus::Healthy,
            missed_count: 0,
            stuck_count: 0,
            missed: Vec::new(),
            stuck: Vec::new(),
            timestamp,
        }
    }
}

pub type SharedHealthReport = Arc<RwLock<HealthReport>>;

pub fn initial_report(clock: &dyn Clock) -> SharedHealthReport {
    Arc::new(RwLock::new(HealthReport::empty(clock.now())))
}

fn as_utc(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

fn classify(issues: usize) -> HealthStatus {
    match issues {
        0 => HealthStatus::Healthy,
        1..=4 => HealthStatus::Warning,
        _ => HealthStatus::Critical,
    }
}

/// One monitor invocation (§4.6). `now` is captured once and held constant.
pub async fn run_once(pool: &SqlitePool, clock: &dyn Clock, stuck_timeout: Duration) -> HealthReport {
    let now = clock.now();
    let current_year = now.year() as i64;

    let range_events = EventRepository::query_by_notify_range(pool, now - Duration::hours(24), now)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "missed-events query failed");
            Vec::new()
        });

    let missed: Vec<MissedEvent> = range_events
        .into_iter()
        .filter(|e| e.last_sent_year < current_year && e.status() != SendingStatus::Completed)
        .map(|e| {
            let hours_overdue = (now - as_utc(e.notify_utc)).num_minutes() as f64 / 60.0;
            MissedEvent {
                user_id: e.user_id,
                event_type: e.event_type,
                hours_overdue,
            }
        })
        .collect();

    let sending_events = EventRepository::query_by_sending_status(pool, SendingStatus::Sending)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "stuck-events query failed");
            Vec::new()
        });

    let mut stuck = Vec::with_capacity(sending_events.len());
    for event in sending_events {
        let Some(attempted_at) = event.sending_attempted_at else {
            continue;
        };
        let elapsed = now - as_utc(attempted_at);
        if elapsed > stuck_timeout {
            if let Err(e) = EventRepository::mark_failed(
                pool,
                &event.user_id,
                &event.event_type,
                "Stuck in sending state detected by health check",
                now,
            )
            .await
            {
                tracing::warn!(user_id = %event.user_id, error = %e, "failed to promote stuck event to failed");
            }
            stuck.push(StuckEvent {
                user_id: event.user_id,
                event_type: event.event_type,
                action: "marked_failed_for_retry",
            });
        } else {
            stuck.push(StuckEvent {
                user_id: event.user_id,
                event_type: event.event_type,
                action: "monitoring",
            });
        }
    }

    let status = classify(missed.len() + stuck.len());
    HealthReport {
        status,
        missed_count: missed.len(),
        stuck_count: stuck.len(),
        missed,
        stuck,
        timestamp: now,
    }
}

pub fn spawn(
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    shared: SharedHealthReport,
    check_interval: std::time::Duration,
    stuck_timeout: Duration,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let report = run_once(&pool, clock.as_ref(), stuck_timeout).await;
            tracing::info!(
                status = ?report.status,
                missed_count = report.missed_count,
                stuck_count = report.stuck_count,
                "health monitor cycle complete"
            );
            *shared.write().await = report;

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("health monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep(check_interval) => {}
            }
        }
    })
}
