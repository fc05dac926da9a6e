//! DLQ processor (C6): periodically redrives dead-lettered messages back onto
//! the main queue once the webhook endpoint is confirmed healthy (§4.5).

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::queue::QueueGateway;
use crate::webhook::WebhookClient;

#[derive(Debug, Default, Clone, Copy)]
pub struct DlqCounters {
    pub redriven: u64,
    pub failures: u64,
}

fn fallback_dedup_key() -> String {
    let mut rng = rand::thread_rng();
    format!("redrive-{}-{}", Utc::now().timestamp_millis(), rng.gen::<u32>())
}

/// One DLQ processor invocation. Health-gates the redrive so a still-down
/// webhook doesn't turn a redrive sweep into a failure storm.
pub async fn run_once(queue: &dyn QueueGateway, webhook: &dyn WebhookClient, batch_size: i64) -> DlqCounters {
    let mut counters = DlqCounters::default();

    let depth = match queue.dlq_depth().await {
        Ok(depth) => depth,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read DLQ depth");
            return counters;
        }
    };
    if depth == 0 {
        return counters;
    }

    if let Err(e) = webhook.probe().await {
        tracing::warn!(error = %e, "webhook unhealthy, skipping DLQ redrive");
        return counters;
    }

    let messages = match queue.dlq_receive(batch_size).await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(error = %e, "failed to receive from DLQ");
            return counters;
        }
    };

    for message in messages {
        let dedup_key = message.dedup_key.clone().unwrap_or_else(fallback_dedup_key);
        match queue.enqueue(&message.group_key, &dedup_key, &message.payload).await {
            Ok(_) => match queue.dlq_delete(&message.id).await {
                Ok(_) => counters.redriven += 1,
                Err(e) => {
                    counters.failures += 1;
                    tracing::warn!(id = %message.id, error = %e, "redrive re-enqueued but DLQ delete failed");
                }
            },
            Err(e) => {
                counters.failures += 1;
                tracing::warn!(id = %message.id, error = %e, "failed to re-enqueue DLQ message");
            }
        }
    }

    counters
}

pub fn spawn(
    queue: Arc<dyn QueueGateway>,
    webhook: Arc<dyn WebhookClient>,
    probe_interval: std::time::Duration,
    batch_size: i64,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let counters = run_once(queue.as_ref(), webhook.as_ref(), batch_size).await;
            tracing::info!(
                redriven = counters.redriven,
                failures = counters.failures,
                "DLQ processor cycle complete"
            );

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("DLQ processor shutting down");
                    break;
                }
                _ = tokio::time::sleep(probe_interval) => {}
            }
        }
    })
}
