//! `dferelay-documents`: the document store.
//!
//! Idempotent, dedup-on-natural-key persistence of fiscal documents and
//! their status history. The natural key is `(tenant, access key)`; duplicate
//! deliveries of an unchanged document are no-ops, and status transitions are
//! append-only history. This store is the source of truth the dashboard
//! collaborator queries.

pub mod alert;
pub mod model;
pub mod quarantine;
pub mod store;

pub use alert::{Alert, AlertCondition, AlertStore, InMemoryAlertStore, PgAlertStore};
pub use model::{
    Direction, DocumentKind, DocumentStatus, FiscalDocument, IncomingDocument, StatusChange,
    UpsertOutcome,
};
pub use quarantine::{InMemoryQuarantineStore, QuarantineStore, QuarantinedItem};
pub use store::{DocumentStore, DocumentStoreError, InMemoryDocumentStore, PgDocumentStore};
