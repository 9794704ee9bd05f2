//! Persistence seams for endpoints and deliveries.
//!
//! Every query the delivery path needs is a named method here; business logic
//! never builds queries itself.

mod memory;
mod postgres;

pub use memory::{InMemoryDeliveryRepository, InMemoryEndpointRepository};
pub use postgres::{PgDeliveryRepository, PgEndpointRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::circuit_breaker::FailureTally;
use crate::error::WebhookError;
use crate::models::{
    AttemptUpdate, CreateDelivery, CreateEndpoint, DeliveryStatus, UpdateEndpoint,
    WebhookDelivery, WebhookEndpoint,
};

/// Storage for tenant endpoints.
///
/// All lookups are scoped by `tenant_id`; an endpoint owned by another tenant
/// behaves exactly like a missing one.
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn create(&self, input: CreateEndpoint) -> Result<WebhookEndpoint, WebhookError>;

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// Endpoints of a tenant, oldest first.
    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError>;

    async fn count_by_tenant(&self, tenant_id: Uuid) -> Result<i64, WebhookError>;

    /// Active, non-disabled endpoints subscribed to `event_type` directly or via `*`.
    async fn find_eligible_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError>;

    /// Partial update in a single write, including the `active` transition.
    async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        changes: UpdateEndpoint,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError>;

    async fn set_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// `active = false`; stamps `disabled_at` unless already set.
    async fn deactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// `active = true`, clears `disabled_at`. `failure_count` is kept.
    async fn reactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// Clears `failure_count` and `disabled_at`; leaves `active` alone.
    async fn reset_circuit_breaker(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError>;

    /// Atomically increment `failure_count` and apply
    /// [`circuit_breaker::evaluate`](crate::circuit_breaker::evaluate) in the
    /// same operation.
    async fn record_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureTally>, WebhookError>;

    /// `failure_count = 0`.
    async fn record_success(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError>;

    async fn touch_last_triggered(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;
}

/// Pagination and status filter for delivery history.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Storage for delivery rows. Rows are never deleted.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Insert at `attempt = 1, status = pending`.
    async fn create(&self, input: CreateDelivery) -> Result<WebhookDelivery, WebhookError>;

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Deliveries of one endpoint, newest first.
    async fn list_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        filter: DeliveryFilter,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;

    async fn count_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, WebhookError>;

    /// Write the outcome of an attempt and clear `abandoned_at`.
    ///
    /// Applies only while the row is still at `expected_attempt` and not
    /// `success`; returns `None` when another invocation got there first.
    async fn record_attempt(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        update: AttemptUpdate,
    ) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// All `pending` and `retrying` deliveries across tenants that were not
    /// abandoned, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<WebhookDelivery>, WebhookError>;

    /// Stamp `abandoned_at` on an unfinished row still at `expected_attempt`.
    /// Status, attempt and response fields are left as they are. The next
    /// recorded attempt clears the stamp.
    async fn mark_abandoned(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, WebhookError>;
}
