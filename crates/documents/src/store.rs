//! Document persistence.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;

use dferelay_core::{AccessKey, DocumentId, TaxId, TenantId};

use crate::model::{
    Direction, DocumentKind, DocumentStatus, FiscalDocument, IncomingDocument, StatusChange,
    UpsertOutcome,
};

/// Document store failure.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("document not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for DocumentStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => DocumentStoreError::NotFound,
            other => DocumentStoreError::Backend(other.to_string()),
        }
    }
}

/// Idempotent document persistence keyed on `(tenant, access key)`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or update one document.
    ///
    /// - unseen key: insert, `Created`
    /// - seen key, same status: no-op, `Unchanged` (immutable fields are not
    ///   overwritten)
    /// - seen key, different status: append history, `StatusChanged`
    async fn upsert(
        &self,
        tenant_id: TenantId,
        incoming: IncomingDocument,
    ) -> Result<UpsertOutcome, DocumentStoreError>;

    async fn get(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
    ) -> Result<FiscalDocument, DocumentStoreError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<FiscalDocument>, DocumentStoreError>;

    /// Record a sent manifestation on an existing document.
    async fn record_manifestation(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
        manifestation: &str,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, DocumentStoreError>;
}

fn apply_upsert(existing: Option<&mut FiscalDocument>, tenant_id: TenantId, incoming: IncomingDocument, now: DateTime<Utc>) -> (UpsertOutcome, Option<FiscalDocument>) {
    match existing {
        None => {
            let doc = FiscalDocument {
                id: DocumentId::new(),
                tenant_id,
                access_key: incoming.access_key,
                kind: incoming.kind,
                direction: incoming.direction,
                issuer: incoming.issuer,
                issuer_name: incoming.issuer_name,
                recipient: incoming.recipient,
                total_cents: incoming.total_cents,
                issued_at: incoming.issued_at,
                status: incoming.status,
                protocol: incoming.protocol,
                status_reason: incoming.status_reason,
                nsu: incoming.nsu,
                raw_ref: incoming.raw_ref,
                manifestation: None,
                manifestation_at: None,
                history: vec![StatusChange {
                    from: None,
                    to: incoming.status,
                    nsu: incoming.nsu,
                    changed_at: now,
                }],
                created_at: now,
                updated_at: now,
            };
            (UpsertOutcome::Created, Some(doc))
        }
        Some(doc) if doc.status == incoming.status => (UpsertOutcome::Unchanged, None),
        Some(doc) => {
            let old = doc.status;
            doc.history.push(StatusChange {
                from: Some(old),
                to: incoming.status,
                nsu: incoming.nsu,
                changed_at: now,
            });
            doc.status = incoming.status;
            doc.nsu = incoming.nsu;
            doc.status_reason = incoming.status_reason;
            doc.updated_at = now;
            (
                UpsertOutcome::StatusChanged {
                    old,
                    new: incoming.status,
                },
                None,
            )
        }
    }
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: Mutex<HashMap<(TenantId, String), FiscalDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(
        &self,
        tenant_id: TenantId,
        incoming: IncomingDocument,
    ) -> Result<UpsertOutcome, DocumentStoreError> {
        let key = (tenant_id, incoming.access_key.as_str().to_string());
        let mut docs = self.docs.lock().expect("document store lock poisoned");
        let now = Utc::now();

        let (outcome, created) = apply_upsert(docs.get_mut(&key), tenant_id, incoming, now);
        if let Some(doc) = created {
            docs.insert(key, doc);
        }
        debug!(tenant_id = %tenant_id, outcome = ?outcome, "document upsert");
        Ok(outcome)
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
    ) -> Result<FiscalDocument, DocumentStoreError> {
        self.docs
            .lock()
            .expect("document store lock poisoned")
            .get(&(tenant_id, access_key.as_str().to_string()))
            .cloned()
            .ok_or(DocumentStoreError::NotFound)
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<FiscalDocument>, DocumentStoreError> {
        let mut docs: Vec<FiscalDocument> = self
            .docs
            .lock()
            .expect("document store lock poisoned")
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn record_manifestation(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
        manifestation: &str,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, DocumentStoreError> {
        let mut docs = self.docs.lock().expect("document store lock poisoned");
        let doc = docs
            .get_mut(&(tenant_id, access_key.as_str().to_string()))
            .ok_or(DocumentStoreError::NotFound)?;
        doc.manifestation = Some(manifestation.to_string());
        doc.manifestation_at = Some(now);
        doc.updated_at = now;
        Ok(doc.clone())
    }
}

/// Postgres-backed document store.
///
/// Status history lives in a companion `document_status_history` table and is
/// append-only; the `fiscal_documents` row carries the current status.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_document(
        row: &sqlx::postgres::PgRow,
        history: Vec<StatusChange>,
    ) -> Result<FiscalDocument, DocumentStoreError> {
        let backend = |e: String| DocumentStoreError::Backend(e);
        let access_key: String = row.try_get("access_key")?;
        let kind: String = row.try_get("kind")?;
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let issuer: String = row.try_get("issuer")?;
        let recipient: Option<String> = row.try_get("recipient")?;
        let nsu: i64 = row.try_get("nsu")?;

        Ok(FiscalDocument {
            id: DocumentId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            access_key: AccessKey::parse(&access_key).map_err(|e| backend(e.to_string()))?,
            kind: DocumentKind::from_str(&kind).map_err(backend)?,
            direction: Direction::from_str(&direction).map_err(backend)?,
            issuer: TaxId::parse(&issuer).map_err(|e| backend(e.to_string()))?,
            issuer_name: row.try_get("issuer_name")?,
            recipient: recipient
                .map(|r| TaxId::parse(&r).map_err(|e| backend(e.to_string())))
                .transpose()?,
            total_cents: row.try_get("total_cents")?,
            issued_at: row.try_get("issued_at")?,
            status: DocumentStatus::from_str(&status).map_err(backend)?,
            protocol: row.try_get("protocol")?,
            status_reason: row.try_get("status_reason")?,
            nsu: nsu.max(0) as u64,
            raw_ref: row.try_get("raw_ref")?,
            manifestation: row.try_get("manifestation")?,
            manifestation_at: row.try_get("manifestation_at")?,
            history,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn load_history(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<StatusChange>, DocumentStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT from_status, to_status, nsu, changed_at
            FROM document_status_history
            WHERE document_id = $1
            ORDER BY changed_at, nsu
            "#,
        )
        .bind(document_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let from: Option<String> = row.try_get("from_status")?;
                let to: String = row.try_get("to_status")?;
                let nsu: i64 = row.try_get("nsu")?;
                Ok(StatusChange {
                    from: from
                        .map(|s| DocumentStatus::from_str(&s).map_err(DocumentStoreError::Backend))
                        .transpose()?,
                    to: DocumentStatus::from_str(&to).map_err(DocumentStoreError::Backend)?,
                    nsu: nsu.max(0) as u64,
                    changed_at: row.try_get("changed_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert(
        &self,
        tenant_id: TenantId,
        incoming: IncomingDocument,
    ) -> Result<UpsertOutcome, DocumentStoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let existing = sqlx::query(
            r#"
            SELECT id, status FROM fiscal_documents
            WHERE tenant_id = $1 AND access_key = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(incoming.access_key.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                let id = DocumentId::new();
                sqlx::query(
                    r#"
                    INSERT INTO fiscal_documents (
                        id, tenant_id, access_key, kind, direction,
                        issuer, issuer_name, recipient, total_cents, issued_at,
                        status, protocol, status_reason, nsu, raw_ref,
                        created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                            $11, $12, $13, $14, $15, $16, $16)
                    "#,
                )
                .bind(id.as_uuid())
                .bind(tenant_id.as_uuid())
                .bind(incoming.access_key.as_str())
                .bind(incoming.kind.as_str())
                .bind(incoming.direction.as_str())
                .bind(incoming.issuer.as_str())
                .bind(&incoming.issuer_name)
                .bind(incoming.recipient.as_ref().map(|r| r.as_str().to_string()))
                .bind(incoming.total_cents)
                .bind(incoming.issued_at)
                .bind(incoming.status.as_str())
                .bind(&incoming.protocol)
                .bind(&incoming.status_reason)
                .bind(incoming.nsu as i64)
                .bind(&incoming.raw_ref)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO document_status_history
                        (document_id, from_status, to_status, nsu, changed_at)
                    VALUES ($1, NULL, $2, $3, $4)
                    "#,
                )
                .bind(id.as_uuid())
                .bind(incoming.status.as_str())
                .bind(incoming.nsu as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                UpsertOutcome::Created
            }
            Some(row) => {
                let id = DocumentId::from_uuid(row.try_get("id")?);
                let status: String = row.try_get("status")?;
                let old =
                    DocumentStatus::from_str(&status).map_err(DocumentStoreError::Backend)?;

                if old == incoming.status {
                    UpsertOutcome::Unchanged
                } else {
                    sqlx::query(
                        r#"
                        UPDATE fiscal_documents
                        SET status = $2, status_reason = $3, nsu = $4, updated_at = $5
                        WHERE id = $1
                        "#,
                    )
                    .bind(id.as_uuid())
                    .bind(incoming.status.as_str())
                    .bind(&incoming.status_reason)
                    .bind(incoming.nsu as i64)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        r#"
                        INSERT INTO document_status_history
                            (document_id, from_status, to_status, nsu, changed_at)
                        VALUES ($1, $2, $3, $4, $5)
                        "#,
                    )
                    .bind(id.as_uuid())
                    .bind(old.as_str())
                    .bind(incoming.status.as_str())
                    .bind(incoming.nsu as i64)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    UpsertOutcome::StatusChanged {
                        old,
                        new: incoming.status,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
    ) -> Result<FiscalDocument, DocumentStoreError> {
        let row = sqlx::query(
            "SELECT * FROM fiscal_documents WHERE tenant_id = $1 AND access_key = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(access_key.as_str())
        .fetch_one(&self.pool)
        .await?;

        let id = DocumentId::from_uuid(row.try_get("id")?);
        let history = self.load_history(id).await?;
        Self::row_to_document(&row, history)
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<FiscalDocument>, DocumentStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM fiscal_documents WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = DocumentId::from_uuid(row.try_get("id")?);
            let history = self.load_history(id).await?;
            docs.push(Self::row_to_document(row, history)?);
        }
        Ok(docs)
    }

    async fn record_manifestation(
        &self,
        tenant_id: TenantId,
        access_key: &AccessKey,
        manifestation: &str,
        now: DateTime<Utc>,
    ) -> Result<FiscalDocument, DocumentStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE fiscal_documents
            SET manifestation = $3, manifestation_at = $4, updated_at = $4
            WHERE tenant_id = $1 AND access_key = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(access_key.as_str())
        .bind(manifestation)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound);
        }
        self.get(tenant_id, access_key).await
    }
}
