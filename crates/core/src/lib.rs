//! `dferelay-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod access_key;
pub mod clock;
pub mod environment;
pub mod error;
pub mod id;
pub mod tax_id;

pub use access_key::{AccessKey, MODEL_INVOICE, MODEL_TRANSPORT};
pub use clock::{Clock, SystemClock};
pub use environment::Environment;
pub use error::DomainError;
pub use id::{AlertId, CertificateId, DeliveryId, DocumentId, EndpointId, TenantId};
pub use tax_id::TaxId;
