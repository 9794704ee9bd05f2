//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{circuit_breakers, deliveries, endpoints};
use crate::openapi::openapi_handler;
use crate::services::endpoint_service::EndpointService;
use crate::services::history_service::HistoryService;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub endpoint_service: Arc<EndpointService>,
    pub history_service: Arc<HistoryService>,
}

impl WebhooksState {
    #[must_use]
    pub fn new(endpoint_service: EndpointService, history_service: HistoryService) -> Self {
        Self {
            endpoint_service: Arc::new(endpoint_service),
            history_service: Arc::new(history_service),
        }
    }
}

/// Creates the webhook router with all routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Endpoint CRUD
        .route(
            "/webhooks/endpoints",
            post(endpoints::create_endpoint_handler).get(endpoints::list_endpoints_handler),
        )
        .route(
            "/webhooks/endpoints/:id",
            get(endpoints::get_endpoint_handler)
                .patch(endpoints::update_endpoint_handler)
                .delete(endpoints::delete_endpoint_handler),
        )
        // Lifecycle
        .route(
            "/webhooks/endpoints/:id/rotate-secret",
            post(endpoints::rotate_secret_handler),
        )
        .route(
            "/webhooks/endpoints/:id/test",
            post(endpoints::test_endpoint_handler),
        )
        .route(
            "/webhooks/endpoints/:id/deactivate",
            post(endpoints::deactivate_endpoint_handler),
        )
        .route(
            "/webhooks/endpoints/:id/reactivate",
            post(endpoints::reactivate_endpoint_handler),
        )
        // Circuit breaker
        .route(
            "/webhooks/endpoints/:id/circuit-breaker",
            get(circuit_breakers::get_circuit_breaker_handler),
        )
        .route(
            "/webhooks/endpoints/:id/circuit-breaker/reset",
            post(circuit_breakers::reset_circuit_breaker_handler),
        )
        // Delivery history
        .route(
            "/webhooks/endpoints/:id/deliveries",
            get(deliveries::list_deliveries_handler),
        )
        .route(
            "/webhooks/endpoints/:id/deliveries/:delivery_id",
            get(deliveries::get_delivery_handler),
        )
        .route(
            "/webhooks/endpoints/:id/deliveries/:delivery_id/retry",
            post(deliveries::retry_delivery_handler),
        )
        // Event types
        .route(
            "/webhooks/event-types",
            get(endpoints::list_event_types_handler),
        )
        .route("/webhooks/openapi.json", get(openapi_handler))
        .with_state(state)
}
