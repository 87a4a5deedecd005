//! Delivery persistence.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;

use dferelay_core::{DeliveryId, EndpointId, TenantId};

use crate::delivery::{AttemptRecord, DeliveryStatus, WebhookDelivery};
use crate::event::EventType;

/// Webhook persistence failure.
#[derive(Debug, Error)]
pub enum WebhookStoreError {
    #[error("not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for WebhookStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => WebhookStoreError::NotFound,
            other => WebhookStoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebhookStoreError {
    fn from(e: serde_json::Error) -> Self {
        WebhookStoreError::Backend(e.to_string())
    }
}

/// Durable delivery queue.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn enqueue(&self, delivery: WebhookDelivery) -> Result<(), WebhookStoreError>;

    /// Non-terminal deliveries whose next attempt is due, oldest first.
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError>;

    /// Persist a delivery's post-attempt state.
    async fn update(&self, delivery: &WebhookDelivery) -> Result<(), WebhookStoreError>;

    async fn get(&self, id: DeliveryId) -> Result<WebhookDelivery, WebhookStoreError>;

    async fn list_for_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError>;
}

/// In-memory delivery queue.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    deliveries: Mutex<HashMap<DeliveryId, WebhookDelivery>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn enqueue(&self, delivery: WebhookDelivery) -> Result<(), WebhookStoreError> {
        self.deliveries
            .lock()
            .expect("delivery store lock poisoned")
            .insert(delivery.id, delivery);
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError> {
        let mut due: Vec<WebhookDelivery> = self
            .deliveries
            .lock()
            .expect("delivery store lock poisoned")
            .values()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn update(&self, delivery: &WebhookDelivery) -> Result<(), WebhookStoreError> {
        let mut deliveries = self.deliveries.lock().expect("delivery store lock poisoned");
        if !deliveries.contains_key(&delivery.id) {
            return Err(WebhookStoreError::NotFound);
        }
        deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn get(&self, id: DeliveryId) -> Result<WebhookDelivery, WebhookStoreError> {
        self.deliveries
            .lock()
            .expect("delivery store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(WebhookStoreError::NotFound)
    }

    async fn list_for_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError> {
        let mut deliveries: Vec<WebhookDelivery> = self
            .deliveries
            .lock()
            .expect("delivery store lock poisoned")
            .values()
            .filter(|d| d.endpoint_id == endpoint_id)
            .cloned()
            .collect();
        deliveries.sort_by_key(|d| d.created_at);
        Ok(deliveries)
    }
}

/// Postgres-backed delivery queue.
///
/// Attempt history is a JSONB column; the row is small and its history is
/// only read for inspection, never filtered on.
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_delivery(row: &sqlx::postgres::PgRow) -> Result<WebhookDelivery, WebhookStoreError> {
        let event: String = row.try_get("event")?;
        let status: String = row.try_get("status")?;
        let history: serde_json::Value = row.try_get("history")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(WebhookDelivery {
            id: DeliveryId::from_uuid(row.try_get("id")?),
            endpoint_id: EndpointId::from_uuid(row.try_get("endpoint_id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            event: EventType::from_str(&event).map_err(WebhookStoreError::Backend)?,
            payload: row.try_get("payload")?,
            attempts: attempts.max(0) as u32,
            status: DeliveryStatus::from_str(&status).map_err(WebhookStoreError::Backend)?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            history: serde_json::from_value::<Vec<AttemptRecord>>(history)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn enqueue(&self, delivery: WebhookDelivery) -> Result<(), WebhookStoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (id, endpoint_id, tenant_id, event, payload, attempts,
                 status, next_attempt_at, history, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(delivery.id.as_uuid())
        .bind(delivery.endpoint_id.as_uuid())
        .bind(delivery.tenant_id.as_uuid())
        .bind(delivery.event.as_str())
        .bind(&delivery.payload)
        .bind(delivery.attempts as i32)
        .bind(delivery.status.as_str())
        .bind(delivery.next_attempt_at)
        .bind(serde_json::to_value(&delivery.history)?)
        .bind(delivery.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE status IN ('pending', 'failed') AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_delivery).collect()
    }

    async fn update(&self, delivery: &WebhookDelivery) -> Result<(), WebhookStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET attempts = $2, status = $3, next_attempt_at = $4, history = $5
            WHERE id = $1
            "#,
        )
        .bind(delivery.id.as_uuid())
        .bind(delivery.attempts as i32)
        .bind(delivery.status.as_str())
        .bind(delivery.next_attempt_at)
        .bind(serde_json::to_value(&delivery.history)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookStoreError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, id: DeliveryId) -> Result<WebhookDelivery, WebhookStoreError> {
        let row = sqlx::query("SELECT * FROM webhook_deliveries WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_delivery(&row)
    }

    async fn list_for_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Result<Vec<WebhookDelivery>, WebhookStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_deliveries WHERE endpoint_id = $1 ORDER BY created_at",
        )
        .bind(endpoint_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_delivery).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delivery(now: DateTime<Utc>) -> WebhookDelivery {
        WebhookDelivery::new(
            EndpointId::new(),
            TenantId::new(),
            EventType::DocumentNew,
            b"{}".to_vec(),
            now,
        )
    }

    #[tokio::test]
    async fn due_returns_only_ripe_non_terminal_deliveries() {
        let store = InMemoryDeliveryStore::new();
        let now = Utc::now();

        let ripe = delivery(now - Duration::minutes(1));
        let mut future = delivery(now);
        future.next_attempt_at = now + Duration::minutes(10);
        let mut delivered = delivery(now - Duration::minutes(5));
        delivered.mark_delivered(now, "200".to_string());

        store.enqueue(ripe.clone()).await.unwrap();
        store.enqueue(future).await.unwrap();
        store.enqueue(delivered).await.unwrap();

        let due = store.due(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ripe.id);
    }

    #[tokio::test]
    async fn due_respects_limit_and_ordering() {
        let store = InMemoryDeliveryStore::new();
        let now = Utc::now();

        let older = delivery(now - Duration::minutes(10));
        let newer = delivery(now - Duration::minutes(1));
        store.enqueue(newer).await.unwrap();
        store.enqueue(older.clone()).await.unwrap();

        let due = store.due(now, 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, older.id);
    }

    #[tokio::test]
    async fn update_of_unknown_delivery_fails() {
        let store = InMemoryDeliveryStore::new();
        let ghost = delivery(Utc::now());
        assert!(matches!(
            store.update(&ghost).await.unwrap_err(),
            WebhookStoreError::NotFound
        ));
    }
}
