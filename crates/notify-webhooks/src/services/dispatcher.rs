//! Event fan-out.
//!
//! Turns one fired event into one pending delivery per eligible, subscribed
//! endpoint of the event's tenant and hands each to the scheduler with zero
//! delay. Endpoints are independent: trouble with one never stops the others.

use std::sync::Arc;
use std::time::Duration;

use crate::error::WebhookError;
use crate::models::{CreateDelivery, WebhookDelivery};
use crate::repository::{DeliveryRepository, EndpointRepository};
use crate::scheduler::{DeliveryScheduler, DeliveryTask, TaskTrigger};
use crate::services::event_publisher::WebhookEvent;

#[derive(Clone)]
pub struct Dispatcher {
    endpoints: Arc<dyn EndpointRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    scheduler: Arc<dyn DeliveryScheduler>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        scheduler: Arc<dyn DeliveryScheduler>,
    ) -> Self {
        Self {
            endpoints,
            deliveries,
            scheduler,
        }
    }

    /// Create and schedule a delivery for every matching endpoint.
    ///
    /// Returns the deliveries that were created; no match is an empty list.
    ///
    /// # Errors
    ///
    /// Fails only when the endpoint lookup itself fails. Per-endpoint errors
    /// are logged and skipped.
    pub async fn dispatch(
        &self,
        event: &WebhookEvent,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let endpoints = self
            .endpoints
            .find_eligible_for_event(event.tenant_id, &event.event_type)
            .await?;

        if endpoints.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                tenant_id = %event.tenant_id,
                "No eligible endpoints subscribed to event"
            );
            return Ok(Vec::new());
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            endpoint_count = endpoints.len(),
            "Dispatching event to subscribed endpoints"
        );

        let payload = serde_json::to_value(event.to_payload())
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize payload: {e}")))?;

        let mut created = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let delivery = match self
                .deliveries
                .create(CreateDelivery {
                    tenant_id: event.tenant_id,
                    endpoint_id: endpoint.id,
                    event_id: event.event_id,
                    event_type: event.event_type.clone(),
                    payload: payload.clone(),
                })
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        endpoint_id = %endpoint.id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to create delivery record"
                    );
                    continue;
                }
            };

            // A delivery that cannot be scheduled now stays pending and is
            // picked up by restart recovery.
            if let Err(e) = self.scheduler.schedule(
                DeliveryTask::for_delivery(&delivery, TaskTrigger::Dispatch),
                Duration::ZERO,
            ) {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Failed to schedule first delivery attempt"
                );
            }

            created.push(delivery);
        }

        Ok(created)
    }
}
