//! Domain records, supported event catalog, and API request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Subscription entry matching every event type.
pub const WILDCARD_EVENT: &str = "*";

// ---------------------------------------------------------------------------
// Event catalog
// ---------------------------------------------------------------------------

/// Event types the platform can notify endpoints about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    PlanChanged,
    PlanCancelled,
    SubscriptionRenewed,
    UsageLimitWarning,
    UsageLimitReached,
    BoostActivated,
    BoostExpired,
    InvoicePaid,
    InvoicePaymentFailed,
    WorkspaceMemberAdded,
    WorkspaceMemberRemoved,
    WebhookTest,
}

impl WebhookEventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanChanged => "plan.changed",
            Self::PlanCancelled => "plan.cancelled",
            Self::SubscriptionRenewed => "subscription.renewed",
            Self::UsageLimitWarning => "usage.limit_warning",
            Self::UsageLimitReached => "usage.limit_reached",
            Self::BoostActivated => "boost.activated",
            Self::BoostExpired => "boost.expired",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::WorkspaceMemberAdded => "workspace.member_added",
            Self::WorkspaceMemberRemoved => "workspace.member_removed",
            Self::WebhookTest => "webhook.test",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|et| et.as_str() == s)
    }

    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::PlanChanged | Self::PlanCancelled | Self::SubscriptionRenewed => "billing",
            Self::InvoicePaid | Self::InvoicePaymentFailed => "billing",
            Self::UsageLimitWarning | Self::UsageLimitReached => "usage",
            Self::BoostActivated | Self::BoostExpired => "boost",
            Self::WorkspaceMemberAdded | Self::WorkspaceMemberRemoved => "workspace",
            Self::WebhookTest => "system",
        }
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::PlanChanged => "The workspace moved to a different plan",
            Self::PlanCancelled => "The workspace plan was cancelled",
            Self::SubscriptionRenewed => "The subscription renewed for a new billing period",
            Self::UsageLimitWarning => "Usage crossed the warning threshold of a plan limit",
            Self::UsageLimitReached => "Usage reached a plan limit",
            Self::BoostActivated => "A temporary capacity boost was activated",
            Self::BoostExpired => "A temporary capacity boost expired",
            Self::InvoicePaid => "An invoice was paid",
            Self::InvoicePaymentFailed => "An invoice payment attempt failed",
            Self::WorkspaceMemberAdded => "A member joined the workspace",
            Self::WorkspaceMemberRemoved => "A member left the workspace",
            Self::WebhookTest => "Synthetic event sent when testing an endpoint",
        }
    }

    /// All supported event types in catalog order.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::PlanChanged,
            Self::PlanCancelled,
            Self::SubscriptionRenewed,
            Self::UsageLimitWarning,
            Self::UsageLimitReached,
            Self::BoostActivated,
            Self::BoostExpired,
            Self::InvoicePaid,
            Self::InvoicePaymentFailed,
            Self::WorkspaceMemberAdded,
            Self::WorkspaceMemberRemoved,
            Self::WebhookTest,
        ]
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A tenant-registered HTTP destination.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub description: Option<String>,
    /// AES-256-GCM encrypted signing secret. Never serialized to callers.
    #[serde(skip_serializing)]
    pub secret_encrypted: String,
    /// Event names, or `*` for all events.
    pub subscribed_events: Vec<String>,
    pub active: bool,
    /// Consecutive failed attempts since the last success.
    pub failure_count: i32,
    /// Set when the circuit breaker opened or the endpoint was deactivated.
    pub disabled_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Eligible for delivery iff active and not disabled.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.active && self.disabled_at.is_none()
    }

    /// Whether this endpoint subscribes to `event_type`, directly or via `*`.
    #[must_use]
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.subscribed_events
            .iter()
            .any(|e| e == event_type || e == WILDCARD_EVENT)
    }
}

/// Input for inserting a new endpoint.
#[derive(Debug, Clone)]
pub struct CreateEndpoint {
    pub tenant_id: Uuid,
    pub url: String,
    pub description: Option<String>,
    pub secret_encrypted: String,
    pub subscribed_events: Vec<String>,
}

/// Partial update of an endpoint's configuration.
#[derive(Debug, Clone, Default)]
pub struct UpdateEndpoint {
    pub url: Option<String>,
    pub description: Option<String>,
    pub subscribed_events: Option<Vec<String>>,
    /// Applied in the same write: `false` deactivates (keeping an existing
    /// `disabled_at`), `true` reactivates.
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Delivery status state machine.
///
/// `pending → {success | retrying | failed}`, `retrying → {success | retrying | failed}`.
/// `success` is terminal; `failed` is terminal for automatic processing and
/// can only be re-entered through a manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether an attempt may move a delivery from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending | Self::Retrying => {
                matches!(next, Self::Retrying | Self::Success | Self::Failed)
            }
            Self::Failed => matches!(next, Self::Success | Self::Failed),
            Self::Success => false,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical delivery of one event to one endpoint, mutated in place across attempts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    /// Idempotency key shared by every delivery fanned out from one event.
    pub event_id: Uuid,
    pub event_type: String,
    /// Envelope sent as the request body. Immutable after creation.
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub status: DeliveryStatus,
    /// HTTP status of the latest attempt; `0` when no response was received.
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub latency_ms: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set when an attempt found the endpoint ineligible. Such a delivery is
    /// left for a manual retry and never re-scheduled on its own.
    pub abandoned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a new delivery at `attempt = 1, status = pending`.
#[derive(Debug, Clone)]
pub struct CreateDelivery {
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// State written back after an attempt has been evaluated.
#[derive(Debug, Clone)]
pub struct AttemptUpdate {
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub latency_ms: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// JSON envelope delivered to endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Uuid,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// API requests
// ---------------------------------------------------------------------------

/// Request body for registering an endpoint.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateEndpointRequest {
    #[validate(url)]
    pub url: String,
    /// Event names or `*`. Must not be empty.
    #[validate(length(min = 1, max = 64))]
    pub events: Vec<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    /// Optional caller-supplied secret; generated when absent.
    #[validate(length(min = 16, max = 256))]
    pub secret: Option<String>,
}

/// Request body for a partial endpoint update.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateEndpointRequest {
    #[validate(url)]
    pub url: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub events: Option<Vec<String>>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    /// `false` deactivates, `true` reactivates.
    pub active: Option<bool>,
}

fn default_limit() -> i64 {
    50
}

/// Pagination for endpoint listing.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListEndpointsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListEndpointsQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Pagination and filtering for delivery history.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// Filter by status (`pending`, `retrying`, `success`, `failed`).
    pub status: Option<String>,
}

impl Default for ListDeliveriesQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            status: None,
        }
    }
}

// ---------------------------------------------------------------------------
// API responses
// ---------------------------------------------------------------------------

/// Endpoint as returned to callers. Never includes the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub description: Option<String>,
    pub events: Vec<String>,
    pub active: bool,
    pub failure_count: i32,
    pub disabled_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookEndpoint> for EndpointResponse {
    fn from(ep: WebhookEndpoint) -> Self {
        Self {
            id: ep.id,
            tenant_id: ep.tenant_id,
            url: ep.url,
            description: ep.description,
            events: ep.subscribed_events,
            active: ep.active,
            failure_count: ep.failure_count,
            disabled_at: ep.disabled_at,
            last_triggered_at: ep.last_triggered_at,
            created_at: ep.created_at,
            updated_at: ep.updated_at,
        }
    }
}

/// Endpoint plus its plaintext secret; only returned on creation and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointWithSecretResponse {
    #[serde(flatten)]
    pub endpoint: EndpointResponse,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointListResponse {
    pub items: Vec<EndpointResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Delivery summary for history listings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub response_code: Option<i32>,
    pub latency_ms: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            endpoint_id: d.endpoint_id,
            event_id: d.event_id,
            event_type: d.event_type,
            status: d.status,
            attempt: d.attempt,
            response_code: d.response_code,
            latency_ms: d.latency_ms,
            delivered_at: d.delivered_at,
            next_retry_at: d.next_retry_at,
            created_at: d.created_at,
        }
    }
}

/// Full delivery record including payload and last response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryDetailResponse {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub latency_ms: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for DeliveryDetailResponse {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            endpoint_id: d.endpoint_id,
            event_id: d.event_id,
            event_type: d.event_type,
            payload: d.payload,
            status: d.status,
            attempt: d.attempt,
            response_code: d.response_code,
            response_body: d.response_body,
            latency_ms: d.latency_ms,
            delivered_at: d.delivered_at,
            next_retry_at: d.next_retry_at,
            abandoned_at: d.abandoned_at,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryListResponse {
    pub items: Vec<DeliveryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeInfo {
    pub event_type: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeInfo>,
}
