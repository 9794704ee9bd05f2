//! In-memory repositories for tests and dry runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DeliveryFilter, DeliveryRepository, EndpointRepository};
use crate::circuit_breaker::{self, FailureTally};
use crate::error::WebhookError;
use crate::models::{
    AttemptUpdate, CreateDelivery, CreateEndpoint, DeliveryStatus, UpdateEndpoint,
    WebhookDelivery, WebhookEndpoint,
};

/// `EndpointRepository` backed by a map. Each mutation holds the write lock
/// for its whole read-modify-write.
#[derive(Debug, Default)]
pub struct InMemoryEndpointRepository {
    endpoints: RwLock<HashMap<Uuid, WebhookEndpoint>>,
}

impl InMemoryEndpointRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to a tenant's endpoint and return the updated row.
    fn modify<F>(&self, tenant_id: Uuid, id: Uuid, f: F) -> Option<WebhookEndpoint>
    where
        F: FnOnce(&mut WebhookEndpoint),
    {
        let mut endpoints = self.endpoints.write().expect("lock poisoned");
        let endpoint = endpoints
            .get_mut(&id)
            .filter(|ep| ep.tenant_id == tenant_id)?;
        f(endpoint);
        endpoint.updated_at = Utc::now();
        Some(endpoint.clone())
    }
}

#[async_trait]
impl EndpointRepository for InMemoryEndpointRepository {
    async fn create(&self, input: CreateEndpoint) -> Result<WebhookEndpoint, WebhookError> {
        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            url: input.url,
            description: input.description,
            secret_encrypted: input.secret_encrypted,
            subscribed_events: input.subscribed_events,
            active: true,
            failure_count: 0,
            disabled_at: None,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.endpoints
            .write()
            .expect("lock poisoned")
            .insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        Ok(self
            .endpoints
            .read()
            .expect("lock poisoned")
            .get(&id)
            .filter(|ep| ep.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError> {
        let endpoints = self.endpoints.read().expect("lock poisoned");
        let mut items: Vec<_> = endpoints
            .values()
            .filter(|ep| ep.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by_key(|ep| (ep.created_at, ep.id));
        Ok(page(items, limit, offset))
    }

    async fn count_by_tenant(&self, tenant_id: Uuid) -> Result<i64, WebhookError> {
        let endpoints = self.endpoints.read().expect("lock poisoned");
        Ok(endpoints
            .values()
            .filter(|ep| ep.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn find_eligible_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError> {
        let endpoints = self.endpoints.read().expect("lock poisoned");
        let mut items: Vec<_> = endpoints
            .values()
            .filter(|ep| {
                ep.tenant_id == tenant_id && ep.is_eligible() && ep.subscribes_to(event_type)
            })
            .cloned()
            .collect();
        items.sort_by_key(|ep| (ep.created_at, ep.id));
        Ok(items)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        changes: UpdateEndpoint,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let now = Utc::now();
        Ok(self.modify(tenant_id, id, |ep| {
            if let Some(url) = changes.url {
                ep.url = url;
            }
            if let Some(description) = changes.description {
                ep.description = Some(description);
            }
            if let Some(events) = changes.subscribed_events {
                ep.subscribed_events = events;
            }
            match changes.active {
                Some(false) => {
                    ep.active = false;
                    ep.disabled_at.get_or_insert(now);
                }
                Some(true) => {
                    ep.active = true;
                    ep.disabled_at = None;
                }
                None => {}
            }
        }))
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        let mut endpoints = self.endpoints.write().expect("lock poisoned");
        if endpoints.get(&id).is_some_and(|ep| ep.tenant_id == tenant_id) {
            endpoints.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        Ok(self.modify(tenant_id, id, |ep| {
            ep.secret_encrypted = secret_encrypted.to_string();
        }))
    }

    async fn deactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        Ok(self.modify(tenant_id, id, |ep| {
            ep.active = false;
            ep.disabled_at.get_or_insert(now);
        }))
    }

    async fn reactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        Ok(self.modify(tenant_id, id, |ep| {
            ep.active = true;
            ep.disabled_at = None;
        }))
    }

    async fn reset_circuit_breaker(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        Ok(self.modify(tenant_id, id, |ep| {
            ep.disabled_at = None;
            ep.failure_count = 0;
        }))
    }

    async fn record_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureTally>, WebhookError> {
        let mut tripped = false;
        let updated = self.modify(tenant_id, id, |ep| {
            ep.failure_count += 1;
            let was_disabled = ep.disabled_at.is_some();
            ep.disabled_at =
                circuit_breaker::evaluate(ep.failure_count, ep.disabled_at, threshold, now);
            tripped = !was_disabled && ep.disabled_at.is_some();
        });
        Ok(updated.map(|ep| FailureTally {
            failure_count: ep.failure_count,
            disabled_at: ep.disabled_at,
            tripped,
        }))
    }

    async fn record_success(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        self.modify(tenant_id, id, |ep| ep.failure_count = 0);
        Ok(())
    }

    async fn touch_last_triggered(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        self.modify(tenant_id, id, |ep| ep.last_triggered_at = Some(at));
        Ok(())
    }
}

/// `DeliveryRepository` backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryRepository {
    deliveries: RwLock<HashMap<Uuid, WebhookDelivery>>,
}

impl InMemoryDeliveryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored delivery (for testing).
    pub fn all(&self) -> Vec<WebhookDelivery> {
        let mut items: Vec<_> = self
            .deliveries
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|d| (d.created_at, d.id));
        items
    }

    /// Overwrite a stored row (for setting up test scenarios).
    pub fn put(&self, delivery: WebhookDelivery) {
        self.deliveries
            .write()
            .expect("lock poisoned")
            .insert(delivery.id, delivery);
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn create(&self, input: CreateDelivery) -> Result<WebhookDelivery, WebhookError> {
        let now = Utc::now();
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            endpoint_id: input.endpoint_id,
            event_id: input.event_id,
            event_type: input.event_type,
            payload: input.payload,
            attempt: 1,
            status: DeliveryStatus::Pending,
            response_code: None,
            response_body: None,
            latency_ms: None,
            delivered_at: None,
            next_retry_at: None,
            abandoned_at: None,
            created_at: now,
            updated_at: now,
        };
        self.put(delivery.clone());
        Ok(delivery)
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        Ok(self
            .deliveries
            .read()
            .expect("lock poisoned")
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        filter: DeliveryFilter,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let deliveries = self.deliveries.read().expect("lock poisoned");
        let mut items: Vec<_> = deliveries
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.endpoint_id == endpoint_id)
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(items, filter.limit, filter.offset))
    }

    async fn count_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, WebhookError> {
        let deliveries = self.deliveries.read().expect("lock poisoned");
        Ok(deliveries
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.endpoint_id == endpoint_id)
            .filter(|d| status.map_or(true, |s| d.status == s))
            .count() as i64)
    }

    async fn record_attempt(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        update: AttemptUpdate,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let mut deliveries = self.deliveries.write().expect("lock poisoned");
        let Some(delivery) = deliveries.get_mut(&id).filter(|d| d.tenant_id == tenant_id) else {
            return Ok(None);
        };
        if delivery.attempt != expected_attempt || delivery.status == DeliveryStatus::Success {
            return Ok(None);
        }

        delivery.status = update.status;
        delivery.attempt = update.attempt;
        delivery.response_code = update.response_code;
        delivery.response_body = update.response_body;
        delivery.latency_ms = update.latency_ms;
        delivery.delivered_at = update.delivered_at;
        delivery.next_retry_at = update.next_retry_at;
        delivery.abandoned_at = None;
        delivery.updated_at = Utc::now();
        Ok(Some(delivery.clone()))
    }

    async fn list_unfinished(&self) -> Result<Vec<WebhookDelivery>, WebhookError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|d| matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::Retrying))
            .filter(|d| d.abandoned_at.is_none())
            .collect())
    }

    async fn mark_abandoned(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, WebhookError> {
        let mut deliveries = self.deliveries.write().expect("lock poisoned");
        let Some(delivery) = deliveries.get_mut(&id).filter(|d| d.tenant_id == tenant_id) else {
            return Ok(false);
        };
        if delivery.attempt != expected_attempt
            || !matches!(delivery.status, DeliveryStatus::Pending | DeliveryStatus::Retrying)
        {
            return Ok(false);
        }
        delivery.abandoned_at.get_or_insert(at);
        Ok(true)
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_endpoint(tenant_id: Uuid, events: &[&str]) -> CreateEndpoint {
        CreateEndpoint {
            tenant_id,
            url: "https://example.com/hook".to_string(),
            description: None,
            secret_encrypted: "enc".to_string(),
            subscribed_events: events.iter().map(|e| (*e).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let repo = InMemoryEndpointRepository::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let ep = repo.create(new_endpoint(tenant_a, &["*"])).await.unwrap();

        assert!(repo.find_by_id(tenant_b, ep.id).await.unwrap().is_none());
        assert!(!repo.delete(tenant_b, ep.id).await.unwrap());
        assert_eq!(repo.count_by_tenant(tenant_b).await.unwrap(), 0);
        assert!(repo
            .find_eligible_for_event(tenant_b, "plan.changed")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_eligible_filter() {
        let repo = InMemoryEndpointRepository::new();
        let tenant = Uuid::new_v4();
        let exact = repo.create(new_endpoint(tenant, &["plan.changed"])).await.unwrap();
        let wildcard = repo.create(new_endpoint(tenant, &["*"])).await.unwrap();
        repo.create(new_endpoint(tenant, &["other.event"])).await.unwrap();
        let inactive = repo.create(new_endpoint(tenant, &["*"])).await.unwrap();
        repo.deactivate(tenant, inactive.id, Utc::now()).await.unwrap();

        let ids: Vec<_> = repo
            .find_eligible_for_event(tenant, "plan.changed")
            .await
            .unwrap()
            .into_iter()
            .map(|ep| ep.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&exact.id));
        assert!(ids.contains(&wildcard.id));
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let repo = Arc::new(InMemoryEndpointRepository::new());
        let tenant = Uuid::new_v4();
        let ep = repo.create(new_endpoint(tenant, &["*"])).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.record_failure(tenant, ep.id, 10, Utc::now())
                    .await
                    .unwrap()
                    .unwrap()
            }));
        }

        let mut trips = 0;
        for handle in handles {
            if handle.await.unwrap().tripped {
                trips += 1;
            }
        }

        let stored = repo.find_by_id(tenant, ep.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 50);
        assert!(stored.disabled_at.is_some());
        assert_eq!(trips, 1);
    }

    #[tokio::test]
    async fn test_deactivate_keeps_existing_disabled_at() {
        let repo = InMemoryEndpointRepository::new();
        let tenant = Uuid::new_v4();
        let ep = repo.create(new_endpoint(tenant, &["*"])).await.unwrap();
        let tally = repo
            .record_failure(tenant, ep.id, 1, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        let deactivated = repo.deactivate(tenant, ep.id, later).await.unwrap().unwrap();
        assert!(!deactivated.active);
        assert_eq!(deactivated.disabled_at, tally.disabled_at);

        let reactivated = repo.reactivate(tenant, ep.id).await.unwrap().unwrap();
        assert!(reactivated.active);
        assert!(reactivated.disabled_at.is_none());
        // Only a success or an explicit reset clears the count.
        assert_eq!(reactivated.failure_count, 1);
    }

    #[tokio::test]
    async fn test_update_applies_fields_and_active_together() {
        let repo = InMemoryEndpointRepository::new();
        let tenant = Uuid::new_v4();
        let ep = repo.create(new_endpoint(tenant, &["*"])).await.unwrap();

        let off = repo
            .update(
                tenant,
                ep.id,
                UpdateEndpoint {
                    url: Some("https://example.com/other".to_string()),
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(off.url, "https://example.com/other");
        assert!(!off.active);
        let disabled_at = off.disabled_at.expect("disabled_at stamped");

        let still_off = repo
            .update(
                tenant,
                ep.id,
                UpdateEndpoint {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still_off.disabled_at, Some(disabled_at));

        let on = repo
            .update(
                tenant,
                ep.id,
                UpdateEndpoint {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(on.active);
        assert!(on.disabled_at.is_none());
        assert_eq!(on.url, "https://example.com/other");
    }

    #[tokio::test]
    async fn test_record_attempt_guards_on_expected_attempt() {
        let repo = InMemoryDeliveryRepository::new();
        let tenant = Uuid::new_v4();
        let d = repo
            .create(CreateDelivery {
                tenant_id: tenant,
                endpoint_id: Uuid::new_v4(),
                event_id: Uuid::new_v4(),
                event_type: "plan.changed".to_string(),
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();

        let retrying = AttemptUpdate {
            status: DeliveryStatus::Retrying,
            attempt: 2,
            response_code: Some(500),
            response_body: None,
            latency_ms: Some(3),
            delivered_at: None,
            next_retry_at: Some(Utc::now()),
        };
        assert!(repo
            .record_attempt(tenant, d.id, 1, retrying.clone())
            .await
            .unwrap()
            .is_some());
        // A second writer for attempt 1 lost the race.
        assert!(repo
            .record_attempt(tenant, d.id, 1, retrying)
            .await
            .unwrap()
            .is_none());

        let stored = repo.find_by_id(tenant, d.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.status, DeliveryStatus::Retrying);
    }

    #[tokio::test]
    async fn test_list_by_endpoint_newest_first_with_filter() {
        let repo = InMemoryDeliveryRepository::new();
        let tenant = Uuid::new_v4();
        let endpoint_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for i in 0..3 {
            let mut d = repo
                .create(CreateDelivery {
                    tenant_id: tenant,
                    endpoint_id,
                    event_id: Uuid::new_v4(),
                    event_type: "plan.changed".to_string(),
                    payload: serde_json::json!({ "n": i }),
                })
                .await
                .unwrap();
            d.created_at = Utc::now() + chrono::Duration::seconds(i);
            if i == 1 {
                d.status = DeliveryStatus::Failed;
            }
            ids.push(d.id);
            repo.put(d);
        }

        let all = repo
            .list_by_endpoint(
                tenant,
                endpoint_id,
                DeliveryFilter {
                    status: None,
                    limit: 10,
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1], ids[0]]
        );

        let failed = repo
            .list_by_endpoint(
                tenant,
                endpoint_id,
                DeliveryFilter {
                    status: Some(DeliveryStatus::Failed),
                    limit: 10,
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            repo.count_by_endpoint(tenant, endpoint_id, Some(DeliveryStatus::Pending))
                .await
                .unwrap(),
            2
        );
        assert_eq!(repo.list_unfinished().await.unwrap().len(), 2);
    }
}
