use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use greeter_service::clock::{Clock, SystemClock};
use greeter_service::config::Config;
use greeter_service::queue::{QueueGateway, SqliteQueueGateway};
use greeter_service::routes;
use greeter_service::services::health_monitor;
use greeter_service::services::init;
use greeter_service::webhook::{ReqwestWebhookClient, WebhookClient};
use greeter_service::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "greeter_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting greeter notification service");

    let pool = init::init_db(&config).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue: Arc<dyn QueueGateway> = Arc::new(SqliteQueueGateway::new(pool.clone()));
    let webhook: Arc<dyn WebhookClient> = Arc::new(ReqwestWebhookClient::new(
        config.webhook.hookbin_url.clone(),
        std::time::Duration::from_secs(config.webhook.timeout_seconds),
    )?);
    let health_report = health_monitor::initial_report(clock.as_ref());

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        queue,
        webhook,
        clock,
        health_report,
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let worker_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let host = config.server.host.clone();
    let port = config.server.port;
    let addr = format!("{}:{}", host, port);

    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}
