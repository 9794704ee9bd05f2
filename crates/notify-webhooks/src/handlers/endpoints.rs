//! CRUD and lifecycle handlers for webhook endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, WebhookError};
use crate::handlers::TenantId;
use crate::models::{
    CreateEndpointRequest, DeliveryDetailResponse, EndpointListResponse, EndpointResponse,
    EndpointWithSecretResponse, EventTypeInfo, EventTypeListResponse, ListEndpointsQuery,
    UpdateEndpointRequest, WebhookEventType,
};
use crate::router::WebhooksState;

// ---------------------------------------------------------------------------
// Endpoint CRUD handlers
// ---------------------------------------------------------------------------

/// Register a new webhook endpoint.
///
/// The response carries the signing secret; it is not returned again.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints",
    tag = "Webhooks",
    params(("X-Tenant-ID" = Uuid, Header, description = "Tenant ID")),
    request_body = CreateEndpointRequest,
    responses(
        (status = 201, description = "Endpoint registered", body = EndpointWithSecretResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Endpoint limit exceeded"),
    )
)]
pub async fn create_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Json(request): Json<CreateEndpointRequest>,
) -> ApiResult<(StatusCode, Json<EndpointWithSecretResponse>)> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let response = state
        .endpoint_service
        .register(tenant_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// List webhook endpoints.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ListEndpointsQuery
    ),
    responses(
        (status = 200, description = "Paginated endpoint list", body = EndpointListResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
pub async fn list_endpoints_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Query(query): Query<ListEndpointsQuery>,
) -> ApiResult<Json<EndpointListResponse>> {
    let response = state.endpoint_service.list(tenant_id, query).await?;
    Ok(Json(response))
}

/// Get a single webhook endpoint.
#[utoipa::path(
    get,
    path = "/webhooks/endpoints/{id}",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint details", body = EndpointResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn get_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let response = state.endpoint_service.get(tenant_id, id).await?;
    Ok(Json(response))
}

/// Update a webhook endpoint.
#[utoipa::path(
    patch,
    path = "/webhooks/endpoints/{id}",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    request_body = UpdateEndpointRequest,
    responses(
        (status = 200, description = "Endpoint updated", body = EndpointResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn update_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateEndpointRequest>,
) -> ApiResult<Json<EndpointResponse>> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let response = state
        .endpoint_service
        .update(tenant_id, id, request)
        .await?;

    Ok(Json(response))
}

/// Delete a webhook endpoint. Its delivery history is kept.
#[utoipa::path(
    delete,
    path = "/webhooks/endpoints/{id}",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 204, description = "Endpoint deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn delete_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.endpoint_service.delete(tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Lifecycle handlers
// ---------------------------------------------------------------------------

/// Replace the endpoint's signing secret.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/rotate-secret",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Secret rotated", body = EndpointWithSecretResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn rotate_secret_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointWithSecretResponse>> {
    let response = state.endpoint_service.rotate_secret(tenant_id, id).await?;
    Ok(Json(response))
}

/// Send a `webhook.test` event to the endpoint and return the delivery.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/test",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Test delivery attempted", body = DeliveryDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
        (status = 409, description = "Endpoint inactive or disabled"),
    )
)]
pub async fn test_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryDetailResponse>> {
    let response = state.history_service.test_endpoint(tenant_id, id).await?;
    Ok(Json(response))
}

/// Deactivate an endpoint.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/deactivate",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint deactivated", body = EndpointResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn deactivate_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let response = state.endpoint_service.deactivate(tenant_id, id).await?;
    Ok(Json(response))
}

/// Reactivate an endpoint, clearing its failure state.
#[utoipa::path(
    post,
    path = "/webhooks/endpoints/{id}/reactivate",
    tag = "Webhooks",
    params(
        ("X-Tenant-ID" = Uuid, Header, description = "Tenant ID"),
        ("id" = Uuid, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint reactivated", body = EndpointResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Endpoint not found"),
    )
)]
pub async fn reactivate_endpoint_handler(
    State(state): State<WebhooksState>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointResponse>> {
    let response = state.endpoint_service.reactivate(tenant_id, id).await?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Event types handler
// ---------------------------------------------------------------------------

/// List the event types an endpoint can subscribe to.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Supported event types", body = EventTypeListResponse),
    )
)]
pub async fn list_event_types_handler() -> Json<EventTypeListResponse> {
    let event_types = WebhookEventType::all()
        .into_iter()
        .map(|et| EventTypeInfo {
            event_type: et.as_str().to_string(),
            category: et.category().to_string(),
            description: et.description().to_string(),
        })
        .collect();

    Json(EventTypeListResponse { event_types })
}
