//! Webhook delivery execution.
//!
//! Runs one attempt of one delivery: re-checks the endpoint, signs and POSTs
//! the stored payload, records the outcome on the delivery row, feeds the
//! circuit breaker, and schedules the next attempt from the backoff schedule.
//!
//! Expected failures (non-2xx, timeouts, refused connections, a secret that
//! cannot be decrypted) are recorded on the row and retried; they are never
//! returned as errors. `execute` only fails when storage does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{AttemptUpdate, DeliveryStatus, WebhookDelivery, WebhookEndpoint};
use crate::repository::{DeliveryRepository, EndpointRepository};
use crate::scheduler::{DeliveryScheduler, DeliveryTask, TaskTrigger};

/// Maximum attempts per delivery (initial + 5 retries).
pub const MAX_ATTEMPTS: i32 = 6;

/// Delay before the next attempt, indexed by completed attempt - 1:
/// 1min, 5min, 30min, 2hr, 24hr.
pub const BACKOFF_SCHEDULE_SECS: [u64; 5] = [60, 300, 1800, 7200, 86400];

/// Delay before the attempt after `completed_attempt`; `None` once retries are exhausted.
#[must_use]
pub fn retry_delay(completed_attempt: i32) -> Option<Duration> {
    if completed_attempt >= MAX_ATTEMPTS {
        return None;
    }
    let idx = usize::try_from(completed_attempt - 1).ok()?;
    BACKOFF_SCHEDULE_SECS
        .get(idx)
        .map(|secs| Duration::from_secs(*secs))
}

/// When the attempt after `completed_attempt` is due, measured from `now`.
#[must_use]
pub fn calculate_next_retry_at(
    completed_attempt: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let delay = retry_delay(completed_attempt)?;
    chrono::Duration::from_std(delay).ok().map(|d| now + d)
}

/// Why an invocation did not attempt delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DeliveryNotFound,
    /// The delivery moved past the task's attempt, or is terminal.
    Stale,
    EndpointNotFound,
    /// Endpoint deactivated or disabled by the circuit breaker.
    EndpointIneligible,
    /// Another invocation recorded this attempt first.
    Superseded,
}

/// Result of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered {
        response_code: i32,
    },
    RetryScheduled {
        next_attempt: i32,
        next_retry_at: DateTime<Utc>,
    },
    Failed {
        response_code: i32,
    },
    Skipped(SkipReason),
}

/// What came back from the destination.
struct HttpResult {
    /// HTTP status, or `0` when no response was received.
    response_code: i32,
    response_body: Option<String>,
    latency_ms: i32,
}

impl HttpResult {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.response_code)
    }

    fn no_response(error: String, latency_ms: i32) -> Self {
        Self {
            response_code: 0,
            response_body: Some(error),
            latency_ms,
        }
    }
}

/// Executes delivery attempts.
#[derive(Clone)]
pub struct DeliveryWorker {
    endpoints: Arc<dyn EndpointRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    scheduler: Arc<dyn DeliveryScheduler>,
    breaker: CircuitBreaker,
    http_client: Client,
    encryption_key: Vec<u8>,
    config: WebhookConfig,
}

impl DeliveryWorker {
    /// Create a worker with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        scheduler: Arc<dyn DeliveryScheduler>,
        encryption_key: Vec<u8>,
        config: WebhookConfig,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let breaker = CircuitBreaker::new(Arc::clone(&endpoints), config.disable_threshold);

        Ok(Self {
            endpoints,
            deliveries,
            scheduler,
            breaker,
            http_client,
            encryption_key,
            config,
        })
    }

    /// Run the attempt described by `task`.
    pub async fn execute(&self, task: DeliveryTask) -> Result<AttemptOutcome, WebhookError> {
        let Some(delivery) = self
            .deliveries
            .find_by_id(task.tenant_id, task.delivery_id)
            .await?
        else {
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %task.delivery_id,
                "Delivery not found; dropping task"
            );
            return Ok(AttemptOutcome::Skipped(SkipReason::DeliveryNotFound));
        };

        if !task.is_current(&delivery) {
            tracing::debug!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                task_attempt = task.attempt,
                attempt = delivery.attempt,
                status = %delivery.status,
                "Skipping stale delivery task"
            );
            return Ok(AttemptOutcome::Skipped(SkipReason::Stale));
        }

        // Eligibility is re-read for every attempt; the row may have changed
        // since the task was scheduled.
        let endpoint = match self
            .endpoints
            .find_by_id(delivery.tenant_id, delivery.endpoint_id)
            .await?
        {
            Some(ep) if ep.is_eligible() => ep,
            Some(ep) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %ep.id,
                    active = ep.active,
                    disabled = ep.disabled_at.is_some(),
                    "Endpoint no longer eligible; abandoning attempt"
                );
                self.abandon(&delivery).await?;
                return Ok(AttemptOutcome::Skipped(SkipReason::EndpointIneligible));
            }
            None => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    "Endpoint deleted; abandoning attempt"
                );
                self.abandon(&delivery).await?;
                return Ok(AttemptOutcome::Skipped(SkipReason::EndpointNotFound));
            }
        };

        let started_at = Utc::now();
        if let Err(e) = self
            .endpoints
            .touch_last_triggered(endpoint.tenant_id, endpoint.id, started_at)
            .await
        {
            tracing::warn!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to update last_triggered_at"
            );
        }

        let result = self.send(&delivery, &endpoint).await;

        if result.is_success() {
            self.handle_success(&delivery, &endpoint, result).await
        } else {
            self.handle_failure(&delivery, &endpoint, result).await
        }
    }

    /// Leave the row as it is but keep it out of restart recovery.
    async fn abandon(&self, delivery: &WebhookDelivery) -> Result<(), WebhookError> {
        self.deliveries
            .mark_abandoned(delivery.tenant_id, delivery.id, delivery.attempt, Utc::now())
            .await?;
        Ok(())
    }

    /// Build, sign and send the request. Never fails: problems become a
    /// `response_code = 0` result.
    async fn send(&self, delivery: &WebhookDelivery, endpoint: &WebhookEndpoint) -> HttpResult {
        let secret = match crypto::decrypt_secret(&endpoint.secret_encrypted, &self.encryption_key)
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Failed to decrypt endpoint secret"
                );
                return HttpResult::no_response(format!("Failed to decrypt secret: {e}"), 0);
            }
        };

        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(b) => b,
            Err(e) => {
                return HttpResult::no_response(format!("Failed to serialize payload: {e}"), 0);
            }
        };

        let timestamp = Utc::now().timestamp();
        let signature = crypto::sign(&secret, timestamp, &body);

        let start = Instant::now();
        let response = self
            .http_client
            .post(&endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(crypto::SIGNATURE_HEADER, signature)
            .header(crypto::TIMESTAMP_HEADER, timestamp.to_string())
            .header(crypto::EVENT_ID_HEADER, delivery.event_id.to_string())
            .header(crypto::EVENT_TYPE_HEADER, delivery.event_type.as_str())
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let response_code = i32::from(response.status().as_u16());
                let text = response.text().await.unwrap_or_default();
                HttpResult {
                    response_code,
                    response_body: Some(truncate(&text, self.config.response_body_limit)),
                    latency_ms: elapsed_ms(start),
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!(
                        "Request timeout ({}s)",
                        self.config.request_timeout.as_secs()
                    )
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };
                HttpResult::no_response(
                    truncate(&error, self.config.response_body_limit),
                    elapsed_ms(start),
                )
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        result: HttpResult,
    ) -> Result<AttemptOutcome, WebhookError> {
        let response_code = result.response_code;
        let update = AttemptUpdate {
            status: DeliveryStatus::Success,
            attempt: delivery.attempt,
            response_code: Some(response_code),
            response_body: result.response_body,
            latency_ms: Some(result.latency_ms),
            delivered_at: Some(Utc::now()),
            next_retry_at: None,
        };

        if !self.record(delivery, update).await? {
            return Ok(AttemptOutcome::Skipped(SkipReason::Superseded));
        }

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            tenant_id = %delivery.tenant_id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_code,
            latency_ms = result.latency_ms,
            attempt = delivery.attempt,
            "Webhook delivery succeeded"
        );

        if let Err(e) = self.breaker.record_success(endpoint.tenant_id, endpoint.id).await {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to reset endpoint failure count"
            );
        }

        Ok(AttemptOutcome::Delivered { response_code })
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        endpoint: &WebhookEndpoint,
        result: HttpResult,
    ) -> Result<AttemptOutcome, WebhookError> {
        let now = Utc::now();
        let response_code = result.response_code;
        let next_retry_at = calculate_next_retry_at(delivery.attempt, now);

        let update = match next_retry_at {
            Some(at) => AttemptUpdate {
                status: DeliveryStatus::Retrying,
                attempt: delivery.attempt + 1,
                response_code: Some(response_code),
                response_body: result.response_body,
                latency_ms: Some(result.latency_ms),
                delivered_at: None,
                next_retry_at: Some(at),
            },
            None => AttemptUpdate {
                status: DeliveryStatus::Failed,
                attempt: delivery.attempt,
                response_code: Some(response_code),
                response_body: result.response_body,
                latency_ms: Some(result.latency_ms),
                delivered_at: None,
                next_retry_at: None,
            },
        };
        let update_status = update.status;
        let next_attempt = update.attempt;

        if !self.record(delivery, update).await? {
            return Ok(AttemptOutcome::Skipped(SkipReason::Superseded));
        }

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            tenant_id = %delivery.tenant_id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_code,
            latency_ms = result.latency_ms,
            attempt = delivery.attempt,
            status = %update_status,
            "Webhook delivery failed"
        );

        if let Some(at) = next_retry_at {
            let task = DeliveryTask {
                tenant_id: delivery.tenant_id,
                delivery_id: delivery.id,
                attempt: next_attempt,
                trigger: TaskTrigger::Retry,
            };
            let delay = (at - now).to_std().unwrap_or_default();
            if let Err(e) = self.scheduler.schedule(task, delay) {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to schedule retry; it will be recovered on restart"
                );
            }
        }

        // Counted after the row is written so a lost race is not counted twice.
        if let Err(e) = self.breaker.record_failure(endpoint.tenant_id, endpoint.id).await {
            tracing::error!(
                target: "webhook_delivery",
                endpoint_id = %endpoint.id,
                error = %e,
                "Failed to record failure to circuit breaker"
            );
        }

        Ok(match next_retry_at {
            Some(at) => AttemptOutcome::RetryScheduled {
                next_attempt,
                next_retry_at: at,
            },
            None => AttemptOutcome::Failed { response_code },
        })
    }

    /// Write the attempt; `false` when another invocation already did.
    async fn record(
        &self,
        delivery: &WebhookDelivery,
        update: AttemptUpdate,
    ) -> Result<bool, WebhookError> {
        debug_assert!(delivery.status.can_transition_to(update.status));
        let written = self
            .deliveries
            .record_attempt(delivery.tenant_id, delivery.id, delivery.attempt, update)
            .await?;

        if written.is_none() {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                attempt = delivery.attempt,
                "Attempt superseded by a concurrent invocation"
            );
        }
        Ok(written.is_some())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn elapsed_ms(start: Instant) -> i32 {
    i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX)
}
