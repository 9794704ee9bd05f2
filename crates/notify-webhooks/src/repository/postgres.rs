//! PostgreSQL repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{DeliveryFilter, DeliveryRepository, EndpointRepository};
use crate::circuit_breaker::FailureTally;
use crate::error::WebhookError;
use crate::models::{
    AttemptUpdate, CreateDelivery, CreateEndpoint, DeliveryStatus, UpdateEndpoint,
    WebhookDelivery, WebhookEndpoint, WILDCARD_EVENT,
};

const ENDPOINT_COLUMNS: &str = "id, tenant_id, url, description, secret_encrypted, \
     subscribed_events, active, failure_count, disabled_at, last_triggered_at, \
     created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, tenant_id, endpoint_id, event_id, event_type, payload, \
     attempt, status, response_code, response_body, latency_ms, delivered_at, \
     next_retry_at, abandoned_at, created_at, updated_at";

/// `EndpointRepository` over the `webhook_endpoints` table.
#[derive(Clone)]
pub struct PgEndpointRepository {
    pool: PgPool,
}

impl PgEndpointRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct FailureRow {
    failure_count: i32,
    disabled_at: Option<DateTime<Utc>>,
    tripped: bool,
}

#[async_trait]
impl EndpointRepository for PgEndpointRepository {
    async fn create(&self, input: CreateEndpoint) -> Result<WebhookEndpoint, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            INSERT INTO webhook_endpoints
                (id, tenant_id, url, description, secret_encrypted, subscribed_events)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.url)
        .bind(&input.description)
        .bind(&input.secret_encrypted)
        .bind(&input.subscribed_events)
        .fetch_one(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
            WHERE id = $1 AND tenant_id = $2
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError> {
        let endpoints = sqlx::query_as(&format!(
            r"
            SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
            WHERE tenant_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    async fn count_by_tenant(&self, tenant_id: Uuid) -> Result<i64, WebhookError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM webhook_endpoints WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn find_eligible_for_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookEndpoint>, WebhookError> {
        let endpoints = sqlx::query_as(&format!(
            r"
            SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
            WHERE tenant_id = $1
              AND active = TRUE
              AND disabled_at IS NULL
              AND ($2 = ANY(subscribed_events) OR $3 = ANY(subscribed_events))
            ORDER BY created_at ASC, id ASC
            "
        ))
        .bind(tenant_id)
        .bind(event_type)
        .bind(WILDCARD_EVENT)
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        changes: UpdateEndpoint,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            UPDATE webhook_endpoints
            SET url = COALESCE($3, url),
                description = COALESCE($4, description),
                subscribed_events = COALESCE($5, subscribed_events),
                active = COALESCE($6::boolean, active),
                disabled_at = CASE
                    WHEN $6::boolean IS NULL THEN disabled_at
                    WHEN $6::boolean THEN NULL
                    ELSE COALESCE(disabled_at, NOW())
                END,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(&changes.url)
        .bind(&changes.description)
        .bind(&changes.subscribed_events)
        .bind(changes.active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            UPDATE webhook_endpoints
            SET secret_encrypted = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(secret_encrypted)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn deactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            UPDATE webhook_endpoints
            SET active = FALSE,
                disabled_at = COALESCE(disabled_at, $3),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn reactivate(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            UPDATE webhook_endpoints
            SET active = TRUE, disabled_at = NULL, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn reset_circuit_breaker(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let endpoint = sqlx::query_as(&format!(
            r"
            UPDATE webhook_endpoints
            SET disabled_at = NULL, failure_count = 0, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {ENDPOINT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn record_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureTally>, WebhookError> {
        // The row lock taken by `prev` serialises concurrent increments; the
        // CASE mirrors circuit_breaker::evaluate.
        let row: Option<FailureRow> = sqlx::query_as(
            r"
            WITH prev AS (
                SELECT id, disabled_at FROM webhook_endpoints
                WHERE id = $1 AND tenant_id = $2
                FOR UPDATE
            )
            UPDATE webhook_endpoints e
            SET failure_count = e.failure_count + 1,
                disabled_at = CASE
                    WHEN e.disabled_at IS NULL AND e.failure_count + 1 >= $3 THEN $4
                    ELSE e.disabled_at
                END,
                updated_at = NOW()
            FROM prev
            WHERE e.id = prev.id
            RETURNING e.failure_count,
                      e.disabled_at,
                      (prev.disabled_at IS NULL AND e.disabled_at IS NOT NULL) AS tripped
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(threshold)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FailureTally {
            failure_count: r.failure_count,
            disabled_at: r.disabled_at,
            tripped: r.tripped,
        }))
    }

    async fn record_success(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET failure_count = 0, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_triggered(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET last_triggered_at = $3
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// `DeliveryRepository` over the `webhook_deliveries` table.
#[derive(Clone)]
pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn create(&self, input: CreateDelivery) -> Result<WebhookDelivery, WebhookError> {
        let delivery = sqlx::query_as(&format!(
            r"
            INSERT INTO webhook_deliveries
                (id, tenant_id, endpoint_id, event_id, event_type, payload, attempt, status)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7)
            RETURNING {DELIVERY_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.endpoint_id)
        .bind(input.event_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .bind(DeliveryStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(delivery)
    }

    async fn find_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let delivery = sqlx::query_as(&format!(
            r"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE id = $1 AND tenant_id = $2
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(delivery)
    }

    async fn list_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        filter: DeliveryFilter,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let deliveries = sqlx::query_as(&format!(
            r"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE tenant_id = $1
              AND endpoint_id = $2
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "
        ))
        .bind(tenant_id)
        .bind(endpoint_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }

    async fn count_by_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, WebhookError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE tenant_id = $1
              AND endpoint_id = $2
              AND ($3::varchar IS NULL OR status = $3)
            ",
        )
        .bind(tenant_id)
        .bind(endpoint_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn record_attempt(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        update: AttemptUpdate,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let delivery = sqlx::query_as(&format!(
            r"
            UPDATE webhook_deliveries
            SET status = $4,
                attempt = $5,
                response_code = $6,
                response_body = $7,
                latency_ms = $8,
                delivered_at = $9,
                next_retry_at = $10,
                abandoned_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
              AND attempt = $3
              AND status <> 'success'
            RETURNING {DELIVERY_COLUMNS}
            "
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(expected_attempt)
        .bind(update.status.as_str())
        .bind(update.attempt)
        .bind(update.response_code)
        .bind(&update.response_body)
        .bind(update.latency_ms)
        .bind(update.delivered_at)
        .bind(update.next_retry_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(delivery)
    }

    async fn list_unfinished(&self) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let deliveries = sqlx::query_as(&format!(
            r"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE status IN ('pending', 'retrying')
              AND abandoned_at IS NULL
            ORDER BY created_at ASC
            "
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }

    async fn mark_abandoned(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        expected_attempt: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, WebhookError> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET abandoned_at = COALESCE(abandoned_at, $4)
            WHERE id = $1 AND tenant_id = $2
              AND attempt = $3
              AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(expected_attempt)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
