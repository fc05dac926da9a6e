pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod routes;
pub mod services;
pub mod time_resolver;
pub mod webhook;

use std::sync::Arc;

use clock::Clock;
use config::Config;
use queue::QueueGateway;
use services::health_monitor::SharedHealthReport;
use webhook::WebhookClient;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub queue: Arc<dyn QueueGateway>,
    pub webhook: Arc<dyn WebhookClient>,
    pub clock: Arc<dyn Clock>,
    pub health_report: SharedHealthReport,
}
