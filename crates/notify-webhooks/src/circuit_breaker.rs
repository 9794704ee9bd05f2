//! Per-endpoint circuit breaker.
//!
//! Counts consecutive failed attempts on the endpoint row and disables the
//! endpoint once the count reaches the configured threshold. The breaker only
//! opens: a disabled endpoint is skipped before it can succeed, so it stays
//! disabled until an operator resets or reactivates it.
//!
//! The trip rule is [`evaluate`]. Repositories apply it inside the same atomic
//! operation that increments `failure_count`, so concurrent failures on one
//! endpoint can neither lose an increment nor skip the trip.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::WebhookEndpoint;
use crate::repository::EndpointRepository;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Deliveries proceed.
    #[default]
    Closed,
    /// Endpoint disabled; no deliveries until reset.
    Open,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// Whether `failure_count` has reached the disable threshold.
#[must_use]
pub fn should_disable(failure_count: i32, threshold: i32) -> bool {
    failure_count >= threshold
}

/// The `disabled_at` value after a failure has been counted.
///
/// An already-disabled endpoint keeps its original timestamp.
#[must_use]
pub fn evaluate(
    failure_count: i32,
    disabled_at: Option<DateTime<Utc>>,
    threshold: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match disabled_at {
        Some(at) => Some(at),
        None if should_disable(failure_count, threshold) => Some(now),
        None => None,
    }
}

/// Endpoint state right after a failure was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTally {
    pub failure_count: i32,
    pub disabled_at: Option<DateTime<Utc>>,
    /// True only for the failure that opened the circuit.
    pub tripped: bool,
}

/// Breaker view of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CircuitBreakerStatus {
    pub endpoint_id: Uuid,
    pub state: CircuitState,
    pub failure_count: i32,
    pub disable_threshold: i32,
    pub disabled_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl CircuitBreakerStatus {
    #[must_use]
    pub fn from_endpoint(endpoint: &WebhookEndpoint, disable_threshold: i32) -> Self {
        Self {
            endpoint_id: endpoint.id,
            state: if endpoint.disabled_at.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            failure_count: endpoint.failure_count,
            disable_threshold,
            disabled_at: endpoint.disabled_at,
            active: endpoint.active,
        }
    }
}

/// Applies breaker policy to endpoint rows.
#[derive(Clone)]
pub struct CircuitBreaker {
    endpoints: Arc<dyn EndpointRepository>,
    disable_threshold: i32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(endpoints: Arc<dyn EndpointRepository>, disable_threshold: i32) -> Self {
        Self {
            endpoints,
            disable_threshold,
        }
    }

    /// Count a failed attempt and open the circuit if the threshold is reached.
    pub async fn record_failure(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<FailureTally, WebhookError> {
        let tally = self
            .endpoints
            .record_failure(tenant_id, endpoint_id, self.disable_threshold, Utc::now())
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        if tally.tripped {
            tracing::warn!(
                target: "circuit_breaker",
                endpoint_id = %endpoint_id,
                tenant_id = %tenant_id,
                failure_count = tally.failure_count,
                threshold = self.disable_threshold,
                "Circuit breaker opened; endpoint disabled due to consecutive failures"
            );
        }

        Ok(tally)
    }

    /// Reset the consecutive failure count after a successful delivery.
    ///
    /// Does not clear `disabled_at`.
    pub async fn record_success(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<(), WebhookError> {
        self.endpoints.record_success(tenant_id, endpoint_id).await
    }

    /// Manually close the circuit: clears `failure_count` and `disabled_at`.
    ///
    /// `active` is left unchanged.
    pub async fn reset(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<WebhookEndpoint, WebhookError> {
        let endpoint = self
            .endpoints
            .reset_circuit_breaker(tenant_id, endpoint_id)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(
            target: "circuit_breaker",
            endpoint_id = %endpoint_id,
            tenant_id = %tenant_id,
            "Circuit breaker manually reset"
        );

        Ok(endpoint)
    }

    pub async fn status(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<CircuitBreakerStatus, WebhookError> {
        let endpoint = self
            .endpoints
            .find_by_id(tenant_id, endpoint_id)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        Ok(CircuitBreakerStatus::from_endpoint(
            &endpoint,
            self.disable_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateEndpoint;
    use crate::repository::InMemoryEndpointRepository;

    async fn breaker_with_endpoint(threshold: i32) -> (CircuitBreaker, Uuid, Uuid) {
        let repo = Arc::new(InMemoryEndpointRepository::new());
        let tenant_id = Uuid::new_v4();
        let ep = repo
            .create(CreateEndpoint {
                tenant_id,
                url: "https://example.com/hook".to_string(),
                description: None,
                secret_encrypted: "enc".to_string(),
                subscribed_events: vec!["*".to_string()],
            })
            .await
            .unwrap();
        (CircuitBreaker::new(repo, threshold), tenant_id, ep.id)
    }

    #[test]
    fn test_circuit_state_default() {
        assert_eq!(CircuitState::default(), CircuitState::Closed);
        assert_eq!(CircuitState::Open.as_str(), "open");
    }

    #[test]
    fn test_should_disable_at_exact_threshold() {
        assert!(!should_disable(9, 10));
        assert!(should_disable(10, 10));
        assert!(should_disable(11, 10));
    }

    #[test]
    fn test_evaluate_keeps_original_disabled_at() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let now = Utc::now();

        assert_eq!(evaluate(3, None, 10, now), None);
        assert_eq!(evaluate(10, None, 10, now), Some(now));
        assert_eq!(evaluate(12, Some(earlier), 10, now), Some(earlier));
        // Disabled by deactivation below threshold stays disabled.
        assert_eq!(evaluate(1, Some(earlier), 10, now), Some(earlier));
    }

    #[tokio::test]
    async fn test_trips_exactly_once_at_threshold() {
        let (breaker, tenant_id, endpoint_id) = breaker_with_endpoint(3).await;

        let first = breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        let second = breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        assert!(!first.tripped && !second.tripped);
        assert!(second.disabled_at.is_none());

        let third = breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        assert!(third.tripped);
        assert_eq!(third.failure_count, 3);
        assert!(third.disabled_at.is_some());

        let fourth = breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        assert!(!fourth.tripped);
        assert_eq!(fourth.disabled_at, third.disabled_at);
    }

    #[tokio::test]
    async fn test_success_resets_count_but_not_disabled_at() {
        let (breaker, tenant_id, endpoint_id) = breaker_with_endpoint(2).await;
        breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        breaker.record_failure(tenant_id, endpoint_id).await.unwrap();

        breaker.record_success(tenant_id, endpoint_id).await.unwrap();

        let status = breaker.status(tenant_id, endpoint_id).await.unwrap();
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let (breaker, tenant_id, endpoint_id) = breaker_with_endpoint(1).await;
        breaker.record_failure(tenant_id, endpoint_id).await.unwrap();
        assert_eq!(
            breaker.status(tenant_id, endpoint_id).await.unwrap().state,
            CircuitState::Open
        );

        let endpoint = breaker.reset(tenant_id, endpoint_id).await.unwrap();
        assert_eq!(endpoint.failure_count, 0);
        assert!(endpoint.disabled_at.is_none());
        assert!(endpoint.active);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let (breaker, tenant_id, _) = breaker_with_endpoint(1).await;
        let result = breaker.record_failure(tenant_id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(WebhookError::EndpointNotFound)));
    }
}
