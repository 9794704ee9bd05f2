//! Webhook delivery engine.
//!
//! Tenant-scoped endpoint registration, fan-out of fired events to subscribed
//! endpoints, HMAC-SHA256 signed HTTP delivery with a fixed retry schedule,
//! automatic disabling of failing endpoints, and queryable delivery history.

pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod migrations;
pub mod models;
pub mod openapi;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod services;
pub mod validation;
pub mod worker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use config::WebhookConfig;
pub use error::WebhookError;
pub use models::{DeliveryStatus, WebhookEventType};
pub use repository::{
    DeliveryRepository, EndpointRepository, InMemoryDeliveryRepository,
    InMemoryEndpointRepository, PgDeliveryRepository, PgEndpointRepository,
};
pub use router::{webhooks_router, WebhooksState};
pub use scheduler::{DeliveryScheduler, DeliveryTask, TokioScheduler};
pub use services::delivery_worker::DeliveryWorker;
pub use services::dispatcher::Dispatcher;
pub use services::endpoint_service::EndpointService;
pub use services::event_publisher::{EventPublisher, WebhookEvent};
pub use services::history_service::HistoryService;
pub use worker::WebhookWorker;
