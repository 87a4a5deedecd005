//! Tenant-configured alert rules.
//!
//! A rule is evaluated against each newly created document; matches fire a
//! notification event. Status changes and duplicate deliveries never
//! re-trigger a rule, so a rule fires at most once per document.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::debug;

use dferelay_core::{AlertId, TaxId, TenantId};

use crate::model::{DocumentStatus, IncomingDocument};
use crate::store::DocumentStoreError;

/// Condition a new document is matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "condition", content = "value", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Every new document.
    NewDocument,
    /// New documents that arrive already cancelled.
    DocumentCancelled,
    /// Total strictly above the threshold, in cents.
    TotalAbove(i64),
    /// Issuer or recipient matches the given tax id.
    PartyTaxId(TaxId),
}

impl AlertCondition {
    pub fn matches(&self, doc: &IncomingDocument) -> bool {
        match self {
            AlertCondition::NewDocument => true,
            AlertCondition::DocumentCancelled => doc.status == DocumentStatus::Cancelled,
            AlertCondition::TotalAbove(threshold) => doc.total_cents > *threshold,
            AlertCondition::PartyTaxId(tax_id) => {
                doc.issuer == *tax_id || doc.recipient.as_ref() == Some(tax_id)
            }
        }
    }

    /// `(kind, value)` pair for flat persistence.
    pub fn as_parts(&self) -> (&'static str, Option<String>) {
        match self {
            AlertCondition::NewDocument => ("new_document", None),
            AlertCondition::DocumentCancelled => ("document_cancelled", None),
            AlertCondition::TotalAbove(threshold) => ("total_above", Some(threshold.to_string())),
            AlertCondition::PartyTaxId(tax_id) => {
                ("party_tax_id", Some(tax_id.as_str().to_string()))
            }
        }
    }

    pub fn from_parts(kind: &str, value: Option<&str>) -> Result<Self, String> {
        match (kind, value) {
            ("new_document", _) => Ok(AlertCondition::NewDocument),
            ("document_cancelled", _) => Ok(AlertCondition::DocumentCancelled),
            ("total_above", Some(v)) => v
                .parse::<i64>()
                .map(AlertCondition::TotalAbove)
                .map_err(|e| format!("bad threshold: {e}")),
            ("party_tax_id", Some(v)) => TaxId::parse(v)
                .map(AlertCondition::PartyTaxId)
                .map_err(|e| format!("bad tax id: {e}")),
            (kind, None) => Err(format!("condition {kind} needs a value")),
            (kind, _) => Err(format!("unknown alert condition: {kind}")),
        }
    }
}

/// One configured alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(flatten)]
    pub condition: AlertCondition,
    pub active: bool,
    pub fire_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            id: AlertId::new(),
            tenant_id,
            name: name.into(),
            condition,
            active: true,
            fire_count: 0,
            last_fired_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Persistence for alert rules.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: Alert) -> Result<(), DocumentStoreError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError>;

    /// Rules eligible for evaluation (active only).
    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError>;

    async fn remove(&self, tenant_id: TenantId, id: AlertId) -> Result<(), DocumentStoreError>;

    /// Bump the fire counter after the rule matched a new document.
    async fn record_fired(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<(), DocumentStoreError>;
}

/// In-memory alert store.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: Mutex<HashMap<TenantId, Vec<Alert>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn insert(&self, alert: Alert) -> Result<(), DocumentStoreError> {
        debug!(tenant_id = %alert.tenant_id, name = %alert.name, "alert rule created");
        self.alerts
            .lock()
            .expect("alert store lock poisoned")
            .entry(alert.tenant_id)
            .or_default()
            .push(alert);
        Ok(())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError> {
        Ok(self
            .alerts
            .lock()
            .expect("alert store lock poisoned")
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError> {
        Ok(self
            .list(tenant_id)
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect())
    }

    async fn remove(&self, tenant_id: TenantId, id: AlertId) -> Result<(), DocumentStoreError> {
        let mut alerts = self.alerts.lock().expect("alert store lock poisoned");
        let rules = alerts.get_mut(&tenant_id).ok_or(DocumentStoreError::NotFound)?;
        let before = rules.len();
        rules.retain(|a| a.id != id);
        if rules.len() == before {
            return Err(DocumentStoreError::NotFound);
        }
        Ok(())
    }

    async fn record_fired(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<(), DocumentStoreError> {
        let mut alerts = self.alerts.lock().expect("alert store lock poisoned");
        let alert = alerts
            .get_mut(&tenant_id)
            .and_then(|rules| rules.iter_mut().find(|a| a.id == id))
            .ok_or(DocumentStoreError::NotFound)?;
        alert.fire_count += 1;
        alert.last_fired_at = Some(now);
        Ok(())
    }
}

/// Postgres-backed alert store.
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<Alert, DocumentStoreError> {
        let condition: String = row.try_get("condition")?;
        let condition_value: Option<String> = row.try_get("condition_value")?;
        let fire_count: i64 = row.try_get("fire_count")?;
        Ok(Alert {
            id: AlertId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            name: row.try_get("name")?,
            condition: AlertCondition::from_parts(&condition, condition_value.as_deref())
                .map_err(DocumentStoreError::Backend)?,
            active: row.try_get("active")?,
            fire_count: fire_count.max(0) as u64,
            last_fired_at: row.try_get("last_fired_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn insert(&self, alert: Alert) -> Result<(), DocumentStoreError> {
        let (condition, condition_value) = alert.condition.as_parts();
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, tenant_id, name, condition, condition_value,
                active, fire_count, last_fired_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id.as_uuid())
        .bind(alert.tenant_id.as_uuid())
        .bind(&alert.name)
        .bind(condition)
        .bind(condition_value)
        .bind(alert.active)
        .bind(alert.fire_count as i64)
        .bind(alert.last_fired_at)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE tenant_id = $1 ORDER BY created_at")
            .bind(tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Alert>, DocumentStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM alerts WHERE tenant_id = $1 AND active ORDER BY created_at",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn remove(&self, tenant_id: TenantId, id: AlertId) -> Result<(), DocumentStoreError> {
        let deleted = sqlx::query("DELETE FROM alerts WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound);
        }
        Ok(())
    }

    async fn record_fired(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<(), DocumentStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE alerts
            SET fire_count = fire_count + 1, last_fired_at = $3
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, DocumentKind};
    use dferelay_core::AccessKey;

    const KEY: &str = "53260812345678000195550010000012341000012349";

    fn doc(status: DocumentStatus, total_cents: i64) -> IncomingDocument {
        IncomingDocument {
            access_key: AccessKey::parse(KEY).unwrap(),
            kind: DocumentKind::Invoice,
            direction: Direction::Inbound,
            issuer: TaxId::parse("12345678000195").unwrap(),
            issuer_name: None,
            recipient: Some(TaxId::parse("98765432000198").unwrap()),
            total_cents,
            issued_at: None,
            status,
            protocol: None,
            status_reason: None,
            nsu: 101,
            raw_ref: None,
        }
    }

    #[test]
    fn conditions_match_what_they_claim() {
        let authorized = doc(DocumentStatus::Authorized, 50_000);
        let cancelled = doc(DocumentStatus::Cancelled, 50_000);

        assert!(AlertCondition::NewDocument.matches(&authorized));
        assert!(!AlertCondition::DocumentCancelled.matches(&authorized));
        assert!(AlertCondition::DocumentCancelled.matches(&cancelled));
        assert!(AlertCondition::TotalAbove(49_999).matches(&authorized));
        assert!(!AlertCondition::TotalAbove(50_000).matches(&authorized));

        let issuer = TaxId::parse("12345678000195").unwrap();
        let recipient = TaxId::parse("98765432000198").unwrap();
        let other = TaxId::parse("11222333000181").unwrap();
        assert!(AlertCondition::PartyTaxId(issuer).matches(&authorized));
        assert!(AlertCondition::PartyTaxId(recipient).matches(&authorized));
        assert!(!AlertCondition::PartyTaxId(other).matches(&authorized));
    }

    #[test]
    fn condition_parts_round_trip() {
        for condition in [
            AlertCondition::NewDocument,
            AlertCondition::DocumentCancelled,
            AlertCondition::TotalAbove(1_000_000),
            AlertCondition::PartyTaxId(TaxId::parse("12345678000195").unwrap()),
        ] {
            let (kind, value) = condition.as_parts();
            let back = AlertCondition::from_parts(kind, value.as_deref()).unwrap();
            assert_eq!(back, condition);
        }
        assert!(AlertCondition::from_parts("total_above", None).is_err());
        assert!(AlertCondition::from_parts("volcano", None).is_err());
    }

    #[tokio::test]
    async fn fired_rule_keeps_count() {
        let store = InMemoryAlertStore::new();
        let tenant = TenantId::new();
        let alert = Alert::new(tenant, "big invoices", AlertCondition::TotalAbove(100));
        let id = alert.id;
        store.insert(alert).await.unwrap();

        let now = Utc::now();
        store.record_fired(tenant, id, now).await.unwrap();
        store.record_fired(tenant, id, now).await.unwrap();

        let rules = store.list(tenant).await.unwrap();
        assert_eq!(rules[0].fire_count, 2);
        assert_eq!(rules[0].last_fired_at, Some(now));
    }

    #[tokio::test]
    async fn inactive_rules_are_skipped() {
        let store = InMemoryAlertStore::new();
        let tenant = TenantId::new();
        let mut muted = Alert::new(tenant, "muted", AlertCondition::NewDocument);
        muted.active = false;
        store.insert(muted).await.unwrap();
        store
            .insert(Alert::new(tenant, "live", AlertCondition::NewDocument))
            .await
            .unwrap();

        assert_eq!(store.list(tenant).await.unwrap().len(), 2);
        let active = store.list_active(tenant).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "live");
    }

    #[tokio::test]
    async fn remove_is_tenant_scoped() {
        let store = InMemoryAlertStore::new();
        let tenant = TenantId::new();
        let alert = Alert::new(tenant, "rule", AlertCondition::NewDocument);
        let id = alert.id;
        store.insert(alert).await.unwrap();

        let err = store.remove(TenantId::new(), id).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotFound));
        store.remove(tenant, id).await.unwrap();
        assert!(store.list(tenant).await.unwrap().is_empty());
    }
}
