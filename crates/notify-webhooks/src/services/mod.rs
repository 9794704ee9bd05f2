//! Business logic services for the webhook delivery engine.

pub mod delivery_worker;
pub mod dispatcher;
pub mod endpoint_service;
pub mod event_publisher;
pub mod history_service;
