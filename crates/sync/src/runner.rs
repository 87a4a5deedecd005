//! One tenant's sync pass.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use dferelay_billing::{BillingEvent, EligibilityGate, Tenant, TenantStore, TenantStoreError};
use dferelay_core::{Clock, TenantId};
use dferelay_dfe::{Decoded, DistributionService, PullError, decode_item};
use dferelay_documents::{
    AlertStore, DocumentStore, DocumentStoreError, QuarantineStore, QuarantinedItem, UpsertOutcome,
};
use dferelay_documents::{DocumentStatus, IncomingDocument};
use dferelay_vault::{CredentialVault, VaultError};
use dferelay_webhooks::{DeliveryWorker, EventType, WebhookStoreError};

use crate::cursor::{CursorStore, CursorStoreError};

/// Why a pass did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Billing status or missing/expired credential.
    Ineligible,
    /// The tenant became blocked at a batch boundary of an in-flight pass.
    BlockedMidRun,
    /// Another pass for the tenant is already in flight.
    LeaseHeld,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub batches: u32,
    pub created: u32,
    pub status_changed: u32,
    pub unchanged: u32,
    pub quarantined: u32,
    pub skipped_items: u32,
    pub events_enqueued: u32,
    pub alerts_fired: u32,
    pub final_cursor: u64,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
}

/// A pass failed. The failure is isolated to this tenant; the cursor keeps
/// whatever progress earlier batches persisted.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Tenant(#[from] TenantStoreError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Cursor(#[from] CursorStoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Webhooks(#[from] WebhookStoreError),
}

/// The sync entry point the scheduler and the manual trigger both use.
#[async_trait]
pub trait TenantSync: Send + Sync {
    async fn sync_tenant(&self, tenant_id: TenantId) -> Result<SyncOutcome, SyncError>;
}

/// Event payload sent to webhook endpoints for document events.
#[derive(Debug, Serialize)]
struct DocumentEventPayload<'a> {
    access_key: &'a str,
    kind: &'a str,
    status: &'a str,
    issuer: &'a str,
    total_cents: i64,
    nsu: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_status: Option<&'a str>,
}

/// Event payload sent when an alert rule fires.
#[derive(Debug, Serialize)]
struct AlertEventPayload<'a> {
    alert_name: &'a str,
    access_key: &'a str,
    total_cents: i64,
}

/// Runs the whole pipeline for one tenant: gate, identity, pull loop,
/// decode, upsert, event fan-out.
pub struct SyncRunner {
    tenants: Arc<dyn TenantStore>,
    vault: Arc<CredentialVault>,
    service: Arc<dyn DistributionService>,
    documents: Arc<dyn DocumentStore>,
    quarantine: Arc<dyn QuarantineStore>,
    alerts: Arc<dyn AlertStore>,
    cursors: Arc<dyn CursorStore>,
    dispatcher: Arc<DeliveryWorker>,
    gate: EligibilityGate,
    clock: Arc<dyn Clock>,
}

impl SyncRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        vault: Arc<CredentialVault>,
        service: Arc<dyn DistributionService>,
        documents: Arc<dyn DocumentStore>,
        quarantine: Arc<dyn QuarantineStore>,
        alerts: Arc<dyn AlertStore>,
        cursors: Arc<dyn CursorStore>,
        dispatcher: Arc<DeliveryWorker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            vault,
            service,
            documents,
            quarantine,
            alerts,
            cursors,
            dispatcher,
            gate: EligibilityGate,
            clock,
        }
    }

    /// Gate check against fresh tenant and credential state, firing the
    /// trial-expiry transition first when it is due.
    async fn eligible(&self, tenant_id: TenantId) -> Result<Option<Tenant>, SyncError> {
        let now = self.clock.now();
        let mut tenant = self.tenants.get(tenant_id).await?;

        if tenant.trial_expired(now) {
            tenant = self
                .tenants
                .apply_event(tenant_id, BillingEvent::TrialExpired)
                .await?;
            info!(tenant_id = %tenant_id, "trial expired, tenant blocked");
        }

        let credential_expiry = self.vault.credential_expiry(tenant_id).await?;
        if self.gate.eligible(&tenant, credential_expiry, now) {
            Ok(Some(tenant))
        } else {
            Ok(None)
        }
    }

    /// Map an upsert outcome to the event it produces, if any.
    fn event_for(outcome: &UpsertOutcome) -> Option<EventType> {
        match outcome {
            UpsertOutcome::Created => Some(EventType::DocumentNew),
            UpsertOutcome::StatusChanged { new, .. } => match new {
                DocumentStatus::Cancelled => Some(EventType::DocumentCancelled),
                DocumentStatus::Denied => Some(EventType::DocumentDenied),
                DocumentStatus::Authorized => Some(EventType::DocumentNew),
            },
            UpsertOutcome::Unchanged => None,
        }
    }

    async fn enqueue_document_event(
        &self,
        tenant_id: TenantId,
        event: EventType,
        doc: &IncomingDocument,
        previous: Option<DocumentStatus>,
    ) -> Result<usize, SyncError> {
        let payload = DocumentEventPayload {
            access_key: doc.access_key.as_str(),
            kind: doc.kind.as_str(),
            status: doc.status.as_str(),
            issuer: doc.issuer.as_str(),
            total_cents: doc.total_cents,
            nsu: doc.nsu,
            previous_status: previous.map(|s| s.as_str()),
        };
        let ids = self
            .dispatcher
            .enqueue_event(tenant_id, event, &payload)
            .await?;
        Ok(ids.len())
    }

    /// Evaluate the tenant's active alert rules against one new document.
    /// Only freshly created documents are evaluated, so a rule fires at most
    /// once per document.
    async fn fire_alerts(
        &self,
        tenant_id: TenantId,
        doc: &IncomingDocument,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for alert in self.alerts.list_active(tenant_id).await? {
            if !alert.condition.matches(doc) {
                continue;
            }
            self.alerts
                .record_fired(tenant_id, alert.id, self.clock.now())
                .await?;
            let payload = AlertEventPayload {
                alert_name: &alert.name,
                access_key: doc.access_key.as_str(),
                total_cents: doc.total_cents,
            };
            report.events_enqueued += self
                .dispatcher
                .enqueue_event(tenant_id, EventType::AlertTriggered, &payload)
                .await?
                .len() as u32;
            report.alerts_fired += 1;
            info!(tenant_id = %tenant_id, alert = %alert.name, "alert fired");
        }
        Ok(())
    }

    /// Process one pulled batch: decode, quarantine, upsert, enqueue events.
    async fn process_batch(
        &self,
        tenant: &Tenant,
        items: &[dferelay_dfe::RawItem],
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for item in items {
            let decoded = match decode_item(&tenant.tax_id, item) {
                Ok(decoded) => decoded,
                Err(failure) => {
                    // One bad item never aborts the batch.
                    self.quarantine
                        .park(QuarantinedItem {
                            tenant_id: tenant.id,
                            nsu: failure.nsu,
                            reason: failure.reason,
                            raw: item.payload.clone(),
                            quarantined_at: self.clock.now(),
                        })
                        .await?;
                    report.quarantined += 1;
                    continue;
                }
            };

            let doc = match decoded {
                Decoded::Document(doc) => doc,
                Decoded::Skipped { .. } => {
                    report.skipped_items += 1;
                    continue;
                }
            };

            let outcome = self.documents.upsert(tenant.id, doc.clone()).await?;
            match &outcome {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::StatusChanged { .. } => report.status_changed += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }

            if let Some(event) = Self::event_for(&outcome) {
                let previous = match outcome {
                    UpsertOutcome::StatusChanged { old, .. } => Some(old),
                    _ => None,
                };
                report.events_enqueued += self
                    .enqueue_document_event(tenant.id, event, &doc, previous)
                    .await? as u32;
            }

            if outcome == UpsertOutcome::Created {
                self.fire_alerts(tenant.id, &doc, report).await?;
            }
        }
        Ok(())
    }

    /// The pull loop. Eligibility is re-checked at every batch boundary so a
    /// tenant blocked mid-run stops promptly.
    async fn run_pass(&self, tenant: Tenant) -> Result<SyncOutcome, SyncError> {
        let identity = self
            .vault
            .issue_identity(tenant.id, tenant.tax_id.clone(), tenant.environment)
            .await?;

        let mut report = SyncReport::default();
        let mut cursor = self.cursors.get(tenant.id).await?;
        let mut tenant = tenant;

        loop {
            let pulled_from = cursor.last_nsu;
            let batch = self.service.pull(&identity, pulled_from).await?;
            report.batches += 1;

            self.process_batch(&tenant, &batch.items, &mut report).await?;

            cursor = self
                .cursors
                .advance(tenant.id, batch.new_cursor, self.clock.now())
                .await?;
            report.final_cursor = cursor.last_nsu;

            // Caught up with the service.
            if batch.items.is_empty() || batch.new_cursor >= batch.max_cursor {
                break;
            }

            // A stalled ack would re-pull the same window forever; end the
            // pass and let the next scheduled one retry.
            if batch.new_cursor <= pulled_from {
                warn!(
                    tenant_id = %tenant.id,
                    cursor = pulled_from,
                    "service ack did not advance the cursor, ending pass"
                );
                break;
            }

            tenant = match self.eligible(tenant.id).await? {
                Some(tenant) => tenant,
                None => {
                    warn!(tenant_id = %tenant.id, "tenant became ineligible mid-run, stopping");
                    return Ok(SyncOutcome::Skipped(SkipReason::BlockedMidRun));
                }
            };
        }

        info!(
            tenant_id = %tenant.id,
            batches = report.batches,
            created = report.created,
            status_changed = report.status_changed,
            unchanged = report.unchanged,
            quarantined = report.quarantined,
            cursor = report.final_cursor,
            "sync pass complete"
        );
        Ok(SyncOutcome::Completed(report))
    }
}

#[async_trait]
impl TenantSync for SyncRunner {
    async fn sync_tenant(&self, tenant_id: TenantId) -> Result<SyncOutcome, SyncError> {
        let Some(tenant) = self.eligible(tenant_id).await? else {
            return Ok(SyncOutcome::Skipped(SkipReason::Ineligible));
        };

        match self.run_pass(tenant).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Credential rejections become a tenant-visible configuration
                // problem instead of a silent retry.
                let visible = match &e {
                    SyncError::Pull(PullError::AuthRejected(reason)) => {
                        format!("credentials rejected by distribution service: {reason}")
                    }
                    other => other.to_string(),
                };
                self.cursors
                    .record_error(tenant_id, &visible, self.clock.now())
                    .await?;
                Err(e)
            }
        }
    }
}
