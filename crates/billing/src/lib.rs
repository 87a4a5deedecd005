//! `dferelay-billing`: tenant billing state and the eligibility gate.
//!
//! Billing facts (payments confirmed, payments missed, cancellations) are
//! produced by the payment collaborator and consumed here as externally
//! verified events. This crate owns the resulting state machine and the
//! single scheduling predicate the rest of the system consults.

pub mod gate;
pub mod status;
pub mod store;
pub mod tenant;

pub use gate::EligibilityGate;
pub use status::{BillingEvent, BillingStatus, TransitionError};
pub use store::{InMemoryTenantStore, PgTenantStore, TenantStore, TenantStoreError};
pub use tenant::Tenant;
