//! The eligibility gate.
//!
//! The single place that decides whether a tenant may be scheduled for a
//! sync. Request handlers and the scheduler consult this predicate instead of
//! re-implementing status checks ad hoc.

use chrono::{DateTime, Utc};

use crate::tenant::Tenant;

/// Scheduling predicate over billing status and credential validity.
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityGate;

impl EligibilityGate {
    /// A tenant is eligible iff its status permits scheduling and a
    /// non-expired credential exists.
    ///
    /// `credential_expiry` is `None` when no credential is configured. The
    /// same check runs at every batch boundary of an in-flight sync, so a
    /// tenant blocked mid-run stops promptly.
    pub fn eligible(
        &self,
        tenant: &Tenant,
        credential_expiry: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        tenant.billing_status.schedulable()
            && credential_expiry.is_some_and(|expires_at| expires_at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BillingStatus;
    use chrono::Duration;
    use dferelay_core::TaxId;

    fn tenant(status: BillingStatus) -> Tenant {
        let mut t = Tenant::new(
            TaxId::parse("12345678000195").unwrap(),
            Utc::now() + Duration::days(14),
        );
        t.billing_status = status;
        t
    }

    #[test]
    fn blocked_is_never_eligible() {
        let gate = EligibilityGate;
        let now = Utc::now();
        let valid_cert = Some(now + Duration::days(90));
        // Even with a valid certificate and regardless of cursor state.
        assert!(!gate.eligible(&tenant(BillingStatus::Blocked), valid_cert, now));
    }

    #[test]
    fn trial_active_overdue_are_eligible_with_valid_cert() {
        let gate = EligibilityGate;
        let now = Utc::now();
        let valid_cert = Some(now + Duration::days(90));
        for status in [
            BillingStatus::Trial,
            BillingStatus::Active,
            BillingStatus::Overdue,
        ] {
            assert!(gate.eligible(&tenant(status), valid_cert, now), "{status:?}");
        }
    }

    #[test]
    fn missing_or_expired_cert_is_ineligible() {
        let gate = EligibilityGate;
        let now = Utc::now();
        let t = tenant(BillingStatus::Active);
        assert!(!gate.eligible(&t, None, now));
        assert!(!gate.eligible(&t, Some(now - Duration::days(1)), now));
    }
}
