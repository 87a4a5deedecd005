//! Per-tenant sync cursors.
//!
//! One row per tenant, created on first sync. The cursor value only ever
//! moves forward; a pull that failed partway never winds it back.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;

use dferelay_core::TenantId;

/// Cursor state for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub tenant_id: TenantId,
    /// Last sequence number acknowledged by the distribution service.
    pub last_nsu: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Tenant-visible description of the last sync failure, cleared on the
    /// next success.
    pub last_error: Option<String>,
}

impl SyncCursor {
    pub fn initial(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            last_nsu: 0,
            last_sync_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CursorStoreError {
    fn from(e: sqlx::Error) -> Self {
        CursorStoreError::Backend(e.to_string())
    }
}

/// Cursor persistence. Advancement is monotonic at the store layer, so no
/// caller mistake can move a cursor backwards.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Current cursor, creating the initial row on first access.
    async fn get(&self, tenant_id: TenantId) -> Result<SyncCursor, CursorStoreError>;

    /// Advance to `new_nsu` and stamp a successful sync. A value at or below
    /// the stored one leaves the cursor where it is but still stamps the
    /// sync time and clears the error.
    async fn advance(
        &self,
        tenant_id: TenantId,
        new_nsu: u64,
        now: DateTime<Utc>,
    ) -> Result<SyncCursor, CursorStoreError>;

    /// Record a sync failure without touching the cursor value.
    async fn record_error(
        &self,
        tenant_id: TenantId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CursorStoreError>;
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<TenantId, SyncCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, tenant_id: TenantId) -> Result<SyncCursor, CursorStoreError> {
        Ok(self
            .cursors
            .lock()
            .expect("cursor store lock poisoned")
            .entry(tenant_id)
            .or_insert_with(|| SyncCursor::initial(tenant_id))
            .clone())
    }

    async fn advance(
        &self,
        tenant_id: TenantId,
        new_nsu: u64,
        now: DateTime<Utc>,
    ) -> Result<SyncCursor, CursorStoreError> {
        let mut cursors = self.cursors.lock().expect("cursor store lock poisoned");
        let cursor = cursors
            .entry(tenant_id)
            .or_insert_with(|| SyncCursor::initial(tenant_id));
        cursor.last_nsu = cursor.last_nsu.max(new_nsu);
        cursor.last_sync_at = Some(now);
        cursor.last_error = None;
        Ok(cursor.clone())
    }

    async fn record_error(
        &self,
        tenant_id: TenantId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CursorStoreError> {
        let mut cursors = self.cursors.lock().expect("cursor store lock poisoned");
        let cursor = cursors
            .entry(tenant_id)
            .or_insert_with(|| SyncCursor::initial(tenant_id));
        cursor.last_sync_at = Some(now);
        cursor.last_error = Some(error.to_string());
        Ok(())
    }
}

/// Postgres-backed cursor store.
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_cursor(row: &sqlx::postgres::PgRow) -> Result<SyncCursor, CursorStoreError> {
        let last_nsu: i64 = row
            .try_get("last_nsu")
            .map_err(|e| CursorStoreError::Backend(e.to_string()))?;
        Ok(SyncCursor {
            tenant_id: TenantId::from_uuid(
                row.try_get("tenant_id")
                    .map_err(|e| CursorStoreError::Backend(e.to_string()))?,
            ),
            last_nsu: last_nsu.max(0) as u64,
            last_sync_at: row
                .try_get("last_sync_at")
                .map_err(|e| CursorStoreError::Backend(e.to_string()))?,
            last_error: row
                .try_get("last_error")
                .map_err(|e| CursorStoreError::Backend(e.to_string()))?,
        })
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, tenant_id: TenantId) -> Result<SyncCursor, CursorStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_cursors (tenant_id, last_nsu)
            VALUES ($1, 0)
            ON CONFLICT (tenant_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id
            RETURNING *
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_cursor(&row)
    }

    async fn advance(
        &self,
        tenant_id: TenantId,
        new_nsu: u64,
        now: DateTime<Utc>,
    ) -> Result<SyncCursor, CursorStoreError> {
        // GREATEST enforces monotonic advancement at the database.
        let row = sqlx::query(
            r#"
            INSERT INTO sync_cursors (tenant_id, last_nsu, last_sync_at, last_error)
            VALUES ($1, $2, $3, NULL)
            ON CONFLICT (tenant_id) DO UPDATE
            SET last_nsu = GREATEST(sync_cursors.last_nsu, EXCLUDED.last_nsu),
                last_sync_at = EXCLUDED.last_sync_at,
                last_error = NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(new_nsu as i64)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_cursor(&row)
    }

    async fn record_error(
        &self,
        tenant_id: TenantId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CursorStoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (tenant_id, last_nsu, last_sync_at, last_error)
            VALUES ($1, 0, $2, $3)
            ON CONFLICT (tenant_id) DO UPDATE
            SET last_sync_at = EXCLUDED.last_sync_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
