//! Tenant model.
//!
//! Owned by the billing subsystem; read-only to the sync core except for the
//! transitions the eligibility gate applies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{Environment, TaxId, TenantId};

use crate::status::BillingStatus;

/// An organization/account boundary. All documents, credentials and webhook
/// endpoints are isolated per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub tax_id: TaxId,
    pub billing_status: BillingStatus,
    /// End of the trial window; only meaningful while `Trial`.
    pub trial_expires_at: Option<DateTime<Utc>>,
    /// Plan limit on stored documents.
    pub document_limit: u32,
    /// Which distribution service environment this tenant pulls from.
    pub environment: Environment,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(tax_id: TaxId, trial_expires_at: DateTime<Utc>) -> Self {
        Self {
            id: TenantId::new(),
            tax_id,
            billing_status: BillingStatus::Trial,
            trial_expires_at: Some(trial_expires_at),
            document_limit: 500,
            environment: Environment::default(),
            created_at: Utc::now(),
        }
    }

    /// Whether a still-`Trial` tenant has outlived its trial window.
    ///
    /// The scheduler uses this to fire the `TrialExpired` transition before
    /// computing eligibility for a tick.
    pub fn trial_expired(&self, now: DateTime<Utc>) -> bool {
        self.billing_status == BillingStatus::Trial
            && self.trial_expires_at.is_some_and(|at| at <= now)
    }
}
