//! Error types for the webhook system.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Webhook system error variants.
///
/// Transient delivery failures are not represented here: they are recorded on
/// the delivery row and retried.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Endpoint limit ({limit}) reached for tenant")]
    EndpointLimitExceeded { limit: i64 },

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Delivery {0} already succeeded and cannot be retried")]
    DeliveryAlreadySucceeded(uuid::Uuid),

    #[error("Endpoint is not eligible for delivery (inactive or disabled by circuit breaker)")]
    EndpointNotEligible,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Missing or invalid tenant identity")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Scheduler unavailable: {0}")]
    Scheduler(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error response returned by webhook API endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl WebhookError {
    /// HTTP status and machine-readable error type for this error.
    #[must_use]
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            WebhookError::Database(_) | WebhookError::Migration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            WebhookError::SsrfDetected(_) => (StatusCode::BAD_REQUEST, "ssrf_detected"),
            WebhookError::EndpointLimitExceeded { .. } => {
                (StatusCode::CONFLICT, "endpoint_limit_exceeded")
            }
            WebhookError::EndpointNotFound => (StatusCode::NOT_FOUND, "endpoint_not_found"),
            WebhookError::DeliveryNotFound => (StatusCode::NOT_FOUND, "delivery_not_found"),
            WebhookError::DeliveryAlreadySucceeded(_) => {
                (StatusCode::CONFLICT, "delivery_already_succeeded")
            }
            WebhookError::EndpointNotEligible => (StatusCode::CONFLICT, "endpoint_not_eligible"),
            WebhookError::EncryptionFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encryption_error")
            }
            WebhookError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            WebhookError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WebhookError::Scheduler(_) => (StatusCode::SERVICE_UNAVAILABLE, "scheduler_error"),
            WebhookError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type, "Webhook API request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;
