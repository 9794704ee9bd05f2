//! Endpoint registry.
//!
//! Registration, configuration changes and lifecycle of tenant endpoints with
//! URL validation, SSRF protection, per-tenant limits and encrypted secrets.
//! The plaintext secret leaves this service only from [`EndpointService::register`]
//! and [`EndpointService::rotate_secret`].

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus};
use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateEndpoint, CreateEndpointRequest, EndpointListResponse, EndpointResponse,
    EndpointWithSecretResponse, ListEndpointsQuery, UpdateEndpoint, UpdateEndpointRequest,
    WebhookEndpoint,
};
use crate::repository::EndpointRepository;
use crate::validation;

/// Service for endpoint registration and lifecycle.
#[derive(Clone)]
pub struct EndpointService {
    endpoints: Arc<dyn EndpointRepository>,
    breaker: CircuitBreaker,
    encryption_key: Vec<u8>,
    config: WebhookConfig,
}

impl EndpointService {
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        encryption_key: Vec<u8>,
        config: WebhookConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(Arc::clone(&endpoints), config.disable_threshold);
        Self {
            endpoints,
            breaker,
            encryption_key,
            config,
        }
    }

    /// Register a new endpoint; generates a secret when none is supplied.
    pub async fn register(
        &self,
        tenant_id: Uuid,
        request: CreateEndpointRequest,
    ) -> Result<EndpointWithSecretResponse, WebhookError> {
        validation::validate_webhook_url(&request.url, self.config.url_policy)?;
        validation::validate_event_types(&request.events)?;

        let count = self.endpoints.count_by_tenant(tenant_id).await?;
        if count >= self.config.max_endpoints_per_tenant {
            return Err(WebhookError::EndpointLimitExceeded {
                limit: self.config.max_endpoints_per_tenant,
            });
        }

        let secret = match request.secret {
            Some(secret) if !secret.trim().is_empty() => secret,
            _ => crypto::generate_secret(),
        };
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let endpoint = self
            .endpoints
            .create(CreateEndpoint {
                tenant_id,
                url: request.url,
                description: request.description,
                secret_encrypted,
                subscribed_events: validation::normalize_event_types(request.events),
            })
            .await?;

        tracing::info!(
            endpoint_id = %endpoint.id,
            tenant_id = %tenant_id,
            events = ?endpoint.subscribed_events,
            "Webhook endpoint registered"
        );

        Ok(EndpointWithSecretResponse {
            endpoint: endpoint.into(),
            secret,
        })
    }

    /// List a tenant's endpoints with pagination.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        query: ListEndpointsQuery,
    ) -> Result<EndpointListResponse, WebhookError> {
        let limit = query.limit.clamp(1, 100);
        let offset = query.offset.max(0);

        let endpoints = self
            .endpoints
            .list_by_tenant(tenant_id, limit, offset)
            .await?;
        let total = self.endpoints.count_by_tenant(tenant_id).await?;

        Ok(EndpointListResponse {
            items: endpoints.into_iter().map(Into::into).collect(),
            total,
            limit,
            offset,
        })
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<EndpointResponse, WebhookError> {
        Ok(self.find(tenant_id, id).await?.into())
    }

    /// Load an endpoint or fail with `EndpointNotFound`.
    pub async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<WebhookEndpoint, WebhookError> {
        self.endpoints
            .find_by_id(tenant_id, id)
            .await?
            .ok_or(WebhookError::EndpointNotFound)
    }

    /// Partial update. `active` is applied in the same write with the
    /// semantics of [`deactivate`](Self::deactivate) and
    /// [`reactivate`](Self::reactivate).
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        request: UpdateEndpointRequest,
    ) -> Result<EndpointResponse, WebhookError> {
        if let Some(ref url) = request.url {
            validation::validate_webhook_url(url, self.config.url_policy)?;
        }
        if let Some(ref events) = request.events {
            validation::validate_event_types(events)?;
        }

        let changes = UpdateEndpoint {
            url: request.url,
            description: request.description,
            subscribed_events: request.events.map(validation::normalize_event_types),
            active: request.active,
        };

        let endpoint = self
            .endpoints
            .update(tenant_id, id, changes)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(
            endpoint_id = %id,
            tenant_id = %tenant_id,
            active = ?request.active,
            "Webhook endpoint updated"
        );
        Ok(endpoint.into())
    }

    /// Delete an endpoint. Its delivery history is kept.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        if !self.endpoints.delete(tenant_id, id).await? {
            return Err(WebhookError::EndpointNotFound);
        }

        tracing::info!(endpoint_id = %id, tenant_id = %tenant_id, "Webhook endpoint deleted");
        Ok(())
    }

    /// Replace the signing secret. The previous secret stops working immediately.
    pub async fn rotate_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<EndpointWithSecretResponse, WebhookError> {
        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let endpoint = self
            .endpoints
            .set_secret(tenant_id, id, &secret_encrypted)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(endpoint_id = %id, tenant_id = %tenant_id, "Webhook secret rotated");

        Ok(EndpointWithSecretResponse {
            endpoint: endpoint.into(),
            secret,
        })
    }

    /// `active = false`; an existing `disabled_at` is kept.
    pub async fn deactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<EndpointResponse, WebhookError> {
        let endpoint = self
            .endpoints
            .deactivate(tenant_id, id, Utc::now())
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(endpoint_id = %id, tenant_id = %tenant_id, "Webhook endpoint deactivated");
        Ok(endpoint.into())
    }

    /// `active = true` and clears `disabled_at`. The failure count is kept;
    /// use [`reset_circuit_breaker`](Self::reset_circuit_breaker) to clear it.
    pub async fn reactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<EndpointResponse, WebhookError> {
        let endpoint = self
            .endpoints
            .reactivate(tenant_id, id)
            .await?
            .ok_or(WebhookError::EndpointNotFound)?;

        tracing::info!(endpoint_id = %id, tenant_id = %tenant_id, "Webhook endpoint reactivated");
        Ok(endpoint.into())
    }

    /// Clear `failure_count` and `disabled_at` without touching `active`.
    pub async fn reset_circuit_breaker(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<EndpointResponse, WebhookError> {
        Ok(self.breaker.reset(tenant_id, id).await?.into())
    }

    pub async fn circuit_breaker_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<CircuitBreakerStatus, WebhookError> {
        self.breaker.status(tenant_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryEndpointRepository;

    const KEY: [u8; 32] = [7u8; 32];

    fn service(config: WebhookConfig) -> (EndpointService, Arc<InMemoryEndpointRepository>) {
        let repo = Arc::new(InMemoryEndpointRepository::new());
        (
            EndpointService::new(repo.clone(), KEY.to_vec(), config),
            repo,
        )
    }

    fn request(url: &str, events: &[&str]) -> CreateEndpointRequest {
        CreateEndpointRequest {
            url: url.to_string(),
            events: events.iter().map(|e| (*e).to_string()).collect(),
            description: None,
            secret: None,
        }
    }

    #[tokio::test]
    async fn test_register_generates_and_encrypts_secret() {
        let (svc, repo) = service(WebhookConfig::default());
        let tenant = Uuid::new_v4();

        let created = svc
            .register(tenant, request("https://example.com/hook", &["plan.changed"]))
            .await
            .unwrap();
        assert!(created.secret.starts_with(crypto::SECRET_PREFIX));

        let stored = repo
            .find_by_id(tenant, created.endpoint.id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.secret_encrypted, created.secret);
        assert_eq!(
            crypto::decrypt_secret(&stored.secret_encrypted, &KEY).unwrap(),
            created.secret
        );
    }

    #[tokio::test]
    async fn test_register_keeps_supplied_secret() {
        let (svc, _) = service(WebhookConfig::default());
        let mut req = request("https://example.com/hook", &["*"]);
        req.secret = Some("my-own-secret-value-123".to_string());

        let created = svc.register(Uuid::new_v4(), req).await.unwrap();
        assert_eq!(created.secret, "my-own-secret-value-123");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (svc, _) = service(WebhookConfig::default());
        let tenant = Uuid::new_v4();

        let err = svc
            .register(tenant, request("not a url", &["plan.changed"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));

        let err = svc
            .register(tenant, request("https://example.com/hook", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Validation(_)));

        let err = svc
            .register(tenant, request("https://192.168.0.10/hook", &["*"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::SsrfDetected(_)));
    }

    #[tokio::test]
    async fn test_endpoint_limit() {
        let (svc, _) = service(WebhookConfig::default().with_max_endpoints(2));
        let tenant = Uuid::new_v4();
        for _ in 0..2 {
            svc.register(tenant, request("https://example.com/hook", &["*"]))
                .await
                .unwrap();
        }

        let err = svc
            .register(tenant, request("https://example.com/hook", &["*"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::EndpointLimitExceeded { limit: 2 }));

        // Other tenants are unaffected.
        assert!(svc
            .register(Uuid::new_v4(), request("https://example.com/hook", &["*"]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rotate_secret_replaces_old_one() {
        let (svc, repo) = service(WebhookConfig::default());
        let tenant = Uuid::new_v4();
        let created = svc
            .register(tenant, request("https://example.com/hook", &["*"]))
            .await
            .unwrap();

        let rotated = svc.rotate_secret(tenant, created.endpoint.id).await.unwrap();
        assert_ne!(rotated.secret, created.secret);

        let stored = repo
            .find_by_id(tenant, created.endpoint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            crypto::decrypt_secret(&stored.secret_encrypted, &KEY).unwrap(),
            rotated.secret
        );
    }

    #[tokio::test]
    async fn test_update_active_flag_drives_lifecycle() {
        let (svc, _) = service(WebhookConfig::default());
        let tenant = Uuid::new_v4();
        let id = svc
            .register(tenant, request("https://example.com/hook", &["*"]))
            .await
            .unwrap()
            .endpoint
            .id;

        let off = svc
            .update(
                tenant,
                id,
                UpdateEndpointRequest {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!off.active);
        assert!(off.disabled_at.is_some());

        let on = svc
            .update(
                tenant,
                id,
                UpdateEndpointRequest {
                    active: Some(true),
                    events: Some(vec!["boost.activated".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(on.active);
        assert!(on.disabled_at.is_none());
        assert_eq!(on.events, vec!["boost.activated"]);
    }

    #[tokio::test]
    async fn test_reset_keeps_active_flag() {
        let (svc, repo) = service(WebhookConfig::default().with_disable_threshold(1));
        let tenant = Uuid::new_v4();
        let id = svc
            .register(tenant, request("https://example.com/hook", &["*"]))
            .await
            .unwrap()
            .endpoint
            .id;

        svc.deactivate(tenant, id).await.unwrap();
        let reset = svc.reset_circuit_breaker(tenant, id).await.unwrap();
        assert!(!reset.active);
        assert!(reset.disabled_at.is_none());

        repo.reactivate(tenant, id).await.unwrap();
        repo.record_failure(tenant, id, 1, Utc::now()).await.unwrap();
        let status = svc.circuit_breaker_status(tenant, id).await.unwrap();
        assert_eq!(status.state, crate::circuit_breaker::CircuitState::Open);
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let (svc, _) = service(WebhookConfig::default());
        let tenant = Uuid::new_v4();
        let id = Uuid::new_v4();

        assert!(matches!(
            svc.get(tenant, id).await,
            Err(WebhookError::EndpointNotFound)
        ));
        assert!(matches!(
            svc.delete(tenant, id).await,
            Err(WebhookError::EndpointNotFound)
        ));
        assert!(matches!(
            svc.rotate_secret(tenant, id).await,
            Err(WebhookError::EndpointNotFound)
        ));
    }
}
