//! `OpenAPI` document for the webhook management API.

use axum::Json;
use utoipa::OpenApi;

use crate::circuit_breaker::{CircuitBreakerStatus, CircuitState};
use crate::handlers::{circuit_breakers, deliveries, endpoints};
use crate::models::{
    CreateEndpointRequest, DeliveryDetailResponse, DeliveryListResponse, DeliveryResponse,
    DeliveryStatus, EndpointListResponse, EndpointResponse, EndpointWithSecretResponse,
    EventTypeInfo, EventTypeListResponse, UpdateEndpointRequest,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Notify Webhooks API",
        version = "0.1.0",
        description = "Tenant webhook endpoint management and delivery history"
    ),
    tags(
        (name = "Webhooks", description = "Webhook endpoint management and delivery tracking"),
        (name = "Circuit Breakers", description = "Automatic endpoint disabling after repeated failures"),
    ),
    paths(
        endpoints::create_endpoint_handler,
        endpoints::list_endpoints_handler,
        endpoints::get_endpoint_handler,
        endpoints::update_endpoint_handler,
        endpoints::delete_endpoint_handler,
        endpoints::rotate_secret_handler,
        endpoints::test_endpoint_handler,
        endpoints::deactivate_endpoint_handler,
        endpoints::reactivate_endpoint_handler,
        endpoints::list_event_types_handler,
        deliveries::list_deliveries_handler,
        deliveries::get_delivery_handler,
        deliveries::retry_delivery_handler,
        circuit_breakers::get_circuit_breaker_handler,
        circuit_breakers::reset_circuit_breaker_handler,
    ),
    components(schemas(
        CreateEndpointRequest,
        UpdateEndpointRequest,
        EndpointResponse,
        EndpointWithSecretResponse,
        EndpointListResponse,
        DeliveryStatus,
        DeliveryResponse,
        DeliveryDetailResponse,
        DeliveryListResponse,
        EventTypeInfo,
        EventTypeListResponse,
        CircuitState,
        CircuitBreakerStatus,
    ))
)]
pub struct ApiDoc;

/// Serve the generated document.
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
