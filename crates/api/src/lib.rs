//! `dferelay-api`: the collaborator-facing HTTP surface.
//!
//! Exposes tenant provisioning, credential upload, webhook endpoint
//! registration, the per-tenant sync status read, the manual sync trigger,
//! and the payment-provider billing event intake. The dashboard and payment
//! collaborators are the only intended consumers.

pub mod app;
