//! Handlers for delivery history and manual retry.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::handlers::TenantId;
use crate::models::{DeliveryDetailResponse, DeliveryListResponse, ListDeliveriesQuery};
use crate::router::WebhooksState;

/// List delivery history for an endpoint, newest first.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}/deliveries",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID"),
        ListDeliveriesQuery
    ),
    responses(
        (status = 200, description = "Paginated delivery list", body = DeliveryListResponse),
        (status = 400, description = "Unknown status filter"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(endpoint_id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> ApiResult<Json<DeliveryListResponse>> {
    let response = state
        .history_service
        .list_deliveries(tenant_id, endpoint_id, query)
        .await?;

    Ok(Json(response))
}

/// Get a delivery with its payload and last response.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}/deliveries/{delivery_id}",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID"),
        ("delivery_id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Delivery details", body = DeliveryDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint or delivery not found"),
    )
)]
pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path((endpoint_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let response = state
        .history_service
        .get_delivery(tenant_id, endpoint_id, delivery_id)
        .await?;

    Ok(Json(response))
}

/// Attempt a pending, retrying or failed delivery again now.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/deliveries/{delivery_id}/retry",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID"),
        ("delivery_id" = Uuid, Path, description = "Delivery ID")
    ),
    responses(
        (status = 200, description = "Delivery attempted", body = DeliveryDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint or delivery not found"),
        (status = 409, description = "Delivery already succeeded or endpoint disabled"),
    )
)]
pub async fn retry_delivery_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path((endpoint_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let response = state
        .history_service
        .retry_delivery(tenant_id, endpoint_id, delivery_id)
        .await?;

    Ok(Json(response))
}
