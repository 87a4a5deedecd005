//! Tenant-registered callback endpoints.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use dferelay_core::{EndpointId, TenantId};

use crate::store::WebhookStoreError;

/// A callback endpoint owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub tenant_id: TenantId,
    pub url: String,
    /// Shared signing secret; never sent on the wire.
    #[serde(skip_serializing)]
    pub secret: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(tenant_id: TenantId, url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: EndpointId::new(),
            tenant_id,
            url: url.into(),
            secret: secret.into(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Endpoint persistence.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn insert(&self, endpoint: WebhookEndpoint) -> Result<(), WebhookStoreError>;

    async fn get(&self, id: EndpointId) -> Result<WebhookEndpoint, WebhookStoreError>;

    /// Active endpoints for a tenant, the fan-out set for one event.
    async fn list_active(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<WebhookEndpoint>, WebhookStoreError>;

    async fn remove(&self, id: EndpointId) -> Result<(), WebhookStoreError>;
}

/// In-memory endpoint store.
#[derive(Debug, Default)]
pub struct InMemoryEndpointStore {
    endpoints: Mutex<HashMap<EndpointId, WebhookEndpoint>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn insert(&self, endpoint: WebhookEndpoint) -> Result<(), WebhookStoreError> {
        self.endpoints
            .lock()
            .expect("endpoint store lock poisoned")
            .insert(endpoint.id, endpoint);
        Ok(())
    }

    async fn get(&self, id: EndpointId) -> Result<WebhookEndpoint, WebhookStoreError> {
        self.endpoints
            .lock()
            .expect("endpoint store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(WebhookStoreError::NotFound)
    }

    async fn list_active(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<WebhookEndpoint>, WebhookStoreError> {
        let mut endpoints: Vec<WebhookEndpoint> = self
            .endpoints
            .lock()
            .expect("endpoint store lock poisoned")
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.active)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.created_at);
        Ok(endpoints)
    }

    async fn remove(&self, id: EndpointId) -> Result<(), WebhookStoreError> {
        self.endpoints
            .lock()
            .expect("endpoint store lock poisoned")
            .remove(&id)
            .map(|_| ())
            .ok_or(WebhookStoreError::NotFound)
    }
}

/// Postgres-backed endpoint store.
pub struct PgEndpointStore {
    pool: PgPool,
}

impl PgEndpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_endpoint(row: &sqlx::postgres::PgRow) -> Result<WebhookEndpoint, WebhookStoreError> {
        Ok(WebhookEndpoint {
            id: EndpointId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            url: row.try_get("url")?,
            secret: row.try_get("secret")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl EndpointStore for PgEndpointStore {
    async fn insert(&self, endpoint: WebhookEndpoint) -> Result<(), WebhookStoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (id, tenant_id, url, secret, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(endpoint.id.as_uuid())
        .bind(endpoint.tenant_id.as_uuid())
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(endpoint.active)
        .bind(endpoint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: EndpointId) -> Result<WebhookEndpoint, WebhookStoreError> {
        let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_endpoint(&row)
    }

    async fn list_active(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<WebhookEndpoint>, WebhookStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_endpoints WHERE tenant_id = $1 AND active ORDER BY created_at",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_endpoint).collect()
    }

    async fn remove(&self, id: EndpointId) -> Result<(), WebhookStoreError> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookStoreError::NotFound);
        }
        Ok(())
    }
}
