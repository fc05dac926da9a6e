use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// The outbound notification payload POSTed to the configured webhook (§6.3):
/// `{"message": "Hey {first} {last}, it's your {eventType}!"}`.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub message: String,
}

impl NotificationPayload {
    pub fn greeting(first_name: &str, last_name: &str, event_type: &str) -> Self {
        Self {
            message: format!("Hey {first_name} {last_name}, it's your {event_type}!"),
        }
    }
}

/// Outcome of a delivery attempt. Only `status_code == 200` counts as success
/// (§6.3: "exactly HTTP 200 is success; everything else, including 2xx
/// variants, is a failure").
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub status_code: u16,
    pub success: bool,
}

/// The sentinel body `probe()` POSTs to check webhook reachability (§4.5
/// step 2), kept distinct from `NotificationPayload` so a probe can never be
/// mistaken for a real delivery on the receiving end.
#[derive(Debug, Clone, Serialize)]
struct ProbePayload {
    test: bool,
}

/// C5's delivery dependency and C6's pre-redrive health gate. Abstracted
/// behind a trait per Design Note §9 so the sender state machine and DLQ
/// processor can be unit tested against a stub instead of a live endpoint.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn deliver(
        &self,
        payload: &NotificationPayload,
        idempotency_key: &str,
    ) -> Result<DeliveryOutcome, AppError>;

    /// Reachability probe the DLQ processor gates redrive on (§4.5 step 2):
    /// POST a `{"test": true}` sentinel body; healthy iff the response is
    /// exactly HTTP 200.
    async fn probe(&self) -> Result<(), AppError>;
}

pub struct ReqwestWebhookClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ReqwestWebhookClient {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build webhook client: {e}")))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn deliver(
        &self,
        payload: &NotificationPayload,
        idempotency_key: &str,
    ) -> Result<DeliveryOutcome, AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(AppError::Request)?;

        let status_code = response.status().as_u16();
        Ok(DeliveryOutcome {
            status_code,
            success: status_code == 200,
        })
    }

    async fn probe(&self) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&ProbePayload { test: true })
            .send()
            .await
            .map_err(AppError::Request)?;

        if response.status().as_u16() == 200 {
            Ok(())
        } else {
            Err(AppError::ServiceUnavailable(format!(
                "webhook probe responded {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_200_counts_as_success() {
        for (code, expected) in [(200u16, true), (201, false), (204, false), (404, false), (500, false)] {
            let outcome = DeliveryOutcome {
                status_code: code,
                success: code == 200,
            };
            assert_eq!(outcome.success, expected);
        }
    }
}
