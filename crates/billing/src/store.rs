//! Tenant persistence.
//!
//! The in-memory store backs tests and single-process deployments; the
//! Postgres store is the production implementation.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;

use dferelay_core::{Environment, TaxId, TenantId};

use crate::status::{BillingEvent, BillingStatus, TransitionError};
use crate::tenant::Tenant;

/// Tenant store failure.
#[derive(Debug, Error)]
pub enum TenantStoreError {
    #[error("tenant not found")]
    NotFound,

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for TenantStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => TenantStoreError::NotFound,
            other => TenantStoreError::Backend(other.to_string()),
        }
    }
}

/// Access to tenant rows.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert(&self, tenant: Tenant) -> Result<(), TenantStoreError>;

    async fn get(&self, id: TenantId) -> Result<Tenant, TenantStoreError>;

    /// All tenants, regardless of status. The scheduler filters with the gate.
    async fn list(&self) -> Result<Vec<Tenant>, TenantStoreError>;

    /// Apply a billing event through the state machine and persist the result.
    ///
    /// Rejected transitions leave the row untouched.
    async fn apply_event(
        &self,
        id: TenantId,
        event: BillingEvent,
    ) -> Result<Tenant, TenantStoreError>;
}

/// In-memory tenant store.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: Mutex<HashMap<TenantId, Tenant>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn insert(&self, tenant: Tenant) -> Result<(), TenantStoreError> {
        self.tenants
            .lock()
            .expect("tenant store lock poisoned")
            .insert(tenant.id, tenant);
        Ok(())
    }

    async fn get(&self, id: TenantId) -> Result<Tenant, TenantStoreError> {
        self.tenants
            .lock()
            .expect("tenant store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(TenantStoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Tenant>, TenantStoreError> {
        let mut tenants: Vec<Tenant> = self
            .tenants
            .lock()
            .expect("tenant store lock poisoned")
            .values()
            .cloned()
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn apply_event(
        &self,
        id: TenantId,
        event: BillingEvent,
    ) -> Result<Tenant, TenantStoreError> {
        let mut tenants = self.tenants.lock().expect("tenant store lock poisoned");
        let tenant = tenants.get_mut(&id).ok_or(TenantStoreError::NotFound)?;
        tenant.billing_status = tenant.billing_status.apply(event)?;
        Ok(tenant.clone())
    }
}

/// Postgres-backed tenant store.
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_tenant(row: &sqlx::postgres::PgRow) -> Result<Tenant, TenantStoreError> {
        let tax_id: String = row.try_get("tax_id")?;
        let status: String = row.try_get("billing_status")?;
        let environment: String = row.try_get("environment")?;
        let document_limit: i32 = row.try_get("document_limit")?;

        Ok(Tenant {
            id: TenantId::from_uuid(row.try_get("id")?),
            tax_id: TaxId::parse(&tax_id).map_err(|e| TenantStoreError::Backend(e.to_string()))?,
            billing_status: BillingStatus::from_str(&status).map_err(TenantStoreError::Backend)?,
            trial_expires_at: row.try_get::<Option<DateTime<Utc>>, _>("trial_expires_at")?,
            document_limit: document_limit.max(0) as u32,
            environment: match environment.as_str() {
                "production" => Environment::Production,
                _ => Environment::Homologation,
            },
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn insert(&self, tenant: Tenant) -> Result<(), TenantStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (
                id, tax_id, billing_status, trial_expires_at,
                document_limit, environment, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.id.as_uuid())
        .bind(tenant.tax_id.as_str())
        .bind(tenant.billing_status.as_str())
        .bind(tenant.trial_expires_at)
        .bind(tenant.document_limit as i32)
        .bind(match tenant.environment {
            Environment::Production => "production",
            Environment::Homologation => "homologation",
        })
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TenantId) -> Result<Tenant, TenantStoreError> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_tenant(&row)
    }

    async fn list(&self) -> Result<Vec<Tenant>, TenantStoreError> {
        let rows = sqlx::query("SELECT * FROM tenants ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_tenant).collect()
    }

    async fn apply_event(
        &self,
        id: TenantId,
        event: BillingEvent,
    ) -> Result<Tenant, TenantStoreError> {
        // Read-modify-write under a transaction so concurrent intake events
        // serialize on the row lock.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        let mut tenant = Self::row_to_tenant(&row)?;
        tenant.billing_status = tenant.billing_status.apply(event)?;

        sqlx::query("UPDATE tenants SET billing_status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(tenant.billing_status.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant() -> Tenant {
        Tenant::new(
            TaxId::parse("12345678000195").unwrap(),
            Utc::now() + Duration::days(14),
        )
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let store = InMemoryTenantStore::new();
        let t = tenant();
        store.insert(t.clone()).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap(), t);
    }

    #[tokio::test]
    async fn apply_event_persists_transition() {
        let store = InMemoryTenantStore::new();
        let t = tenant();
        store.insert(t.clone()).await.unwrap();

        let updated = store
            .apply_event(t.id, BillingEvent::PaymentConfirmed)
            .await
            .unwrap();
        assert_eq!(updated.billing_status, BillingStatus::Active);
        assert_eq!(
            store.get(t.id).await.unwrap().billing_status,
            BillingStatus::Active
        );
    }

    #[tokio::test]
    async fn invalid_transition_leaves_row_untouched() {
        let store = InMemoryTenantStore::new();
        let mut t = tenant();
        t.billing_status = BillingStatus::Blocked;
        store.insert(t.clone()).await.unwrap();

        let err = store
            .apply_event(t.id, BillingEvent::PaymentConfirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantStoreError::InvalidTransition(_)));
        assert_eq!(
            store.get(t.id).await.unwrap().billing_status,
            BillingStatus::Blocked
        );
    }

    #[tokio::test]
    async fn missing_tenant_is_not_found() {
        let store = InMemoryTenantStore::new();
        assert!(matches!(
            store.get(TenantId::new()).await.unwrap_err(),
            TenantStoreError::NotFound
        ));
    }
}
