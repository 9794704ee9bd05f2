//! Delivery history, manual retry and endpoint testing.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{
    CreateDelivery, DeliveryDetailResponse, DeliveryListResponse, DeliveryStatus,
    ListDeliveriesQuery, WebhookDelivery, WebhookEndpoint, WebhookEventType,
};
use crate::repository::{DeliveryFilter, DeliveryRepository, EndpointRepository};
use crate::scheduler::{DeliveryTask, TaskTrigger};
use crate::services::delivery_worker::{AttemptOutcome, DeliveryWorker};
use crate::services::event_publisher::WebhookEvent;

/// Read side of deliveries plus the two operator actions that re-enter the worker.
#[derive(Clone)]
pub struct HistoryService {
    endpoints: Arc<dyn EndpointRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    worker: DeliveryWorker,
}

impl HistoryService {
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        worker: DeliveryWorker,
    ) -> Self {
        Self {
            endpoints,
            deliveries,
            worker,
        }
    }

    /// Deliveries of an endpoint, newest first.
    pub async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        query: ListDeliveriesQuery,
    ) -> Result<DeliveryListResponse, WebhookError> {
        self.endpoint(tenant_id, endpoint_id).await?;

        let status = match query.status.as_deref() {
            Some(s) => Some(DeliveryStatus::parse(s).ok_or_else(|| {
                WebhookError::Validation(format!("Unknown delivery status: {s}"))
            })?),
            None => None,
        };
        let limit = query.limit.clamp(1, 100);
        let offset = query.offset.max(0);

        let deliveries = self
            .deliveries
            .list_by_endpoint(
                tenant_id,
                endpoint_id,
                DeliveryFilter {
                    status,
                    limit,
                    offset,
                },
            )
            .await?;
        let total = self
            .deliveries
            .count_by_endpoint(tenant_id, endpoint_id, status)
            .await?;

        Ok(DeliveryListResponse {
            items: deliveries.into_iter().map(Into::into).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get_delivery(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<DeliveryDetailResponse, WebhookError> {
        self.endpoint(tenant_id, endpoint_id).await?;
        Ok(self.delivery(tenant_id, endpoint_id, delivery_id).await?.into())
    }

    /// Try a delivery again now, continuing from its current attempt.
    ///
    /// Rejected for `success`. Runs the worker inline and returns the row as
    /// it stands afterwards.
    pub async fn retry_delivery(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<DeliveryDetailResponse, WebhookError> {
        let endpoint = self.endpoint(tenant_id, endpoint_id).await?;
        let delivery = self.delivery(tenant_id, endpoint_id, delivery_id).await?;

        if delivery.status == DeliveryStatus::Success {
            return Err(WebhookError::DeliveryAlreadySucceeded(delivery.id));
        }
        if !endpoint.is_eligible() {
            return Err(WebhookError::EndpointNotEligible);
        }

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint_id,
            attempt = delivery.attempt,
            status = %delivery.status,
            "Manual retry requested"
        );

        self.run_now(&delivery).await
    }

    /// Send a synthetic `webhook.test` event to one endpoint through the
    /// normal delivery path.
    pub async fn test_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<DeliveryDetailResponse, WebhookError> {
        let endpoint = self.endpoint(tenant_id, endpoint_id).await?;
        if !endpoint.is_eligible() {
            return Err(WebhookError::EndpointNotEligible);
        }

        let event = WebhookEvent::new(
            tenant_id,
            WebhookEventType::WebhookTest,
            serde_json::json!({
                "endpoint_id": endpoint.id,
                "message": "This is a test event",
            }),
        );
        let payload = serde_json::to_value(event.to_payload())
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize payload: {e}")))?;

        let delivery = self
            .deliveries
            .create(CreateDelivery {
                tenant_id,
                endpoint_id: endpoint.id,
                event_id: event.event_id,
                event_type: event.event_type,
                payload,
            })
            .await?;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint.id,
            "Sending test event"
        );

        self.run_now(&delivery).await
    }

    async fn run_now(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<DeliveryDetailResponse, WebhookError> {
        let outcome = self
            .worker
            .execute(DeliveryTask::for_delivery(delivery, TaskTrigger::Manual))
            .await?;

        if let AttemptOutcome::Skipped(reason) = outcome {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                reason = ?reason,
                "Manual attempt skipped"
            );
        }

        Ok(self
            .delivery(delivery.tenant_id, delivery.endpoint_id, delivery.id)
            .await?
            .into())
    }

    async fn endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<WebhookEndpoint, WebhookError> {
        self.endpoints
            .find_by_id(tenant_id, endpoint_id)
            .await?
            .ok_or(WebhookError::EndpointNotFound)
    }

    /// A delivery that belongs to `endpoint_id`.
    async fn delivery(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<WebhookDelivery, WebhookError> {
        self.deliveries
            .find_by_id(tenant_id, delivery_id)
            .await?
            .filter(|d| d.endpoint_id == endpoint_id)
            .ok_or(WebhookError::DeliveryNotFound)
    }
}
