//! HTTP handlers for the webhook management API.

pub mod circuit_breakers;
pub mod deliveries;
pub mod endpoints;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use uuid::Uuid;

use crate::error::WebhookError;

/// Header carrying the caller's tenant.
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Tenant ID extracted from the `X-Tenant-ID` header.
///
/// Tenant identity is resolved by whatever sits in front of this API; the
/// handlers only require that it is passed explicitly.
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = WebhookError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_tenant_id(&parts.headers)
    }
}

fn extract_tenant_id(headers: &HeaderMap) -> Result<TenantId, WebhookError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<Uuid>().ok())
        .map(TenantId)
        .ok_or(WebhookError::Unauthorized)
}
