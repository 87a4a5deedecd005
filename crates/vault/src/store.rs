//! Credential record persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;

use dferelay_core::{CertificateId, TenantId};

use crate::record::{CredentialMode, CredentialRecord};

/// Credential store failure.
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CredentialStoreError {
    fn from(e: sqlx::Error) -> Self {
        CredentialStoreError::Backend(e.to_string())
    }
}

/// One credential record per tenant; replace on re-upload.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the tenant's record.
    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError>;

    async fn get(&self, tenant_id: TenantId) -> Result<Option<CredentialRecord>, CredentialStoreError>;

    /// Explicit removal; the only way a record disappears.
    async fn remove(&self, tenant_id: TenantId) -> Result<(), CredentialStoreError>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: Mutex<HashMap<TenantId, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError> {
        self.records
            .lock()
            .expect("credential store lock poisoned")
            .insert(record.tenant_id, record);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        Ok(self
            .records
            .lock()
            .expect("credential store lock poisoned")
            .get(&tenant_id)
            .cloned())
    }

    async fn remove(&self, tenant_id: TenantId) -> Result<(), CredentialStoreError> {
        self.records
            .lock()
            .expect("credential store lock poisoned")
            .remove(&tenant_id);
        Ok(())
    }
}

/// Postgres-backed credential store.
///
/// The mode payload (including encrypted blobs) is stored as JSONB; blobs are
/// already ciphertext by the time they reach this layer.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn put(&self, record: CredentialRecord) -> Result<(), CredentialStoreError> {
        let mode = serde_json::to_value(&record.mode)
            .map_err(|e| CredentialStoreError::Backend(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO credentials (id, tenant_id, mode, expires_at, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id)
            DO UPDATE SET
                id = EXCLUDED.id,
                mode = EXCLUDED.mode,
                expires_at = EXCLUDED.expires_at,
                uploaded_at = EXCLUDED.uploaded_at
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.tenant_id.as_uuid())
        .bind(mode)
        .bind(record.expires_at)
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        let row = sqlx::query("SELECT * FROM credentials WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let mode: serde_json::Value = row.try_get("mode")?;
            let mode: CredentialMode = serde_json::from_value(mode)
                .map_err(|e| CredentialStoreError::Backend(e.to_string()))?;
            Ok(CredentialRecord {
                id: CertificateId::from_uuid(row.try_get("id")?),
                tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
                mode,
                expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
                uploaded_at: row.try_get::<DateTime<Utc>, _>("uploaded_at")?,
            })
        })
        .transpose()
    }

    async fn remove(&self, tenant_id: TenantId) -> Result<(), CredentialStoreError> {
        sqlx::query("DELETE FROM credentials WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenant_id: TenantId) -> CredentialRecord {
        CredentialRecord {
            id: CertificateId::new(),
            tenant_id,
            mode: CredentialMode::PublicLookup,
            expires_at: Utc::now() + chrono::Duration::days(365),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_replaces_existing_record() {
        let store = InMemoryCredentialStore::new();
        let tenant = TenantId::new();

        let first = record(tenant);
        store.put(first.clone()).await.unwrap();

        let second = record(tenant);
        store.put(second.clone()).await.unwrap();

        let got = store.get(tenant).await.unwrap().unwrap();
        assert_eq!(got.id, second.id);
        assert_ne!(got.id, first.id);
    }

    #[tokio::test]
    async fn remove_is_explicit() {
        let store = InMemoryCredentialStore::new();
        let tenant = TenantId::new();
        store.put(record(tenant)).await.unwrap();
        store.remove(tenant).await.unwrap();
        assert!(store.get(tenant).await.unwrap().is_none());
    }
}
