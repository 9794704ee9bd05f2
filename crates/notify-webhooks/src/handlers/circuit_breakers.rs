//! HTTP handlers for per-endpoint circuit breaker state.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerStatus;
use crate::error::ApiResult;
use crate::handlers::TenantId;
use crate::models::EndpointResponse;
use crate::router::WebhooksState;

/// Get circuit breaker status for an endpoint.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}/circuit-breaker",
    tag = "Circuit Breakers",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Circuit breaker status", body = CircuitBreakerStatus),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn get_circuit_breaker_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(endpoint_id): Path<Uuid>,
) -> ApiResult<Json<CircuitBreakerStatus>> {
    let status = state
        .endpoint_service
        .circuit_breaker_status(tenant_id, endpoint_id)
        .await?;

    Ok(Json(status))
}

/// Clear the failure count and disabled marker without changing `active`.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/circuit-breaker/reset",
    tag = "Circuit Breakers",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Circuit breaker reset", body = EndpointResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn reset_circuit_breaker_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(endpoint_id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let response = state
        .endpoint_service
        .reset_circuit_breaker(tenant_id, endpoint_id)
        .await?;

    Ok(Json(response))
}
