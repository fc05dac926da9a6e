//! Initialization helpers for the application:
//! - database connection + migrations
//! - background worker spawn helpers (scheduler, sender pool, DLQ processor, health monitor)
//!
//! This module centralizes bits that used to live in `main.rs`.

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;
use crate::services::{dlq_processor, health_monitor, scheduler, sender};
use crate::AppState;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    // Extract the file path from the database URL
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
            tracing::info!(
                "Database directory created or already exists: {}",
                parent.display()
            );
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    // Log successful database file creation or connection
    if db_file_path.exists() {
        tracing::info!(
            "Successfully connected to database file: {}",
            db_file_path.display()
        );
    } else {
        tracing::info!(
            "Database file created successfully: {}",
            db_file_path.display()
        );
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the four background components (§4.3–§4.6): the scheduler sweep,
/// the sender worker pool, the DLQ processor, and the health monitor. Each
/// listens for shutdown via a `tokio::sync::broadcast::Sender<()>`, matching
/// this codebase's existing worker shutdown protocol.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(scheduler::spawn(
        state.db.clone(),
        state.queue.clone(),
        state.clock.clone(),
        std::time::Duration::from_secs(state.config.scheduler.sweep_interval_seconds),
        state.config.scheduler.page_size,
        shutdown.subscribe(),
    ));

    handles.extend(sender::spawn(
        state.db.clone(),
        state.queue.clone(),
        state.webhook.clone(),
        state.clock.clone(),
        state.config.sender.worker_count,
        std::time::Duration::from_secs(state.config.sender.poll_interval_seconds),
        chrono::Duration::seconds(state.config.sender.stuck_timeout_seconds),
        &shutdown,
    ));

    handles.push(dlq_processor::spawn(
        state.queue.clone(),
        state.webhook.clone(),
        std::time::Duration::from_secs(state.config.dlq.probe_interval_seconds),
        state.config.dlq.batch_size,
        shutdown.subscribe(),
    ));

    handles.push(health_monitor::spawn(
        state.db.clone(),
        state.clock.clone(),
        state.health_report.clone(),
        std::time::Duration::from_secs(state.config.monitor.check_interval_seconds),
        chrono::Duration::seconds(state.config.monitor.stuck_timeout_seconds),
        shutdown.subscribe(),
    ));

    handles
}
