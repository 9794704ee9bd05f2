//! In-process event source: application code publishes, the runner fans out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{WebhookEventType, WebhookPayload};

/// A domain event raised on behalf of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Idempotency key shared by every delivery of this event.
    pub event_id: Uuid,
    pub event_type: String,
    pub tenant_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(tenant_id: Uuid, event_type: WebhookEventType, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.as_str().to_string(),
            tenant_id,
            timestamp: Utc::now(),
            data,
        }
    }

    /// The envelope delivered to endpoints.
    #[must_use]
    pub fn to_payload(&self) -> WebhookPayload {
        WebhookPayload {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            timestamp: self.timestamp,
            tenant_id: self.tenant_id,
            data: self.data.clone(),
        }
    }
}

/// Publisher that sends webhook events to a broadcast channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<WebhookEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<WebhookEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish an event. Fire-and-forget: errors are logged but not propagated.
    pub fn publish(&self, event: WebhookEvent) {
        let event_id = event.event_id;
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(
                target: "webhook_delivery",
                event_id = %event_id,
                error = %e,
                "No webhook runner is listening; event dropped"
            );
        }
    }

    /// Get a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WebhookEvent> {
        self.sender.subscribe()
    }
}
