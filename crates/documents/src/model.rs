//! Fiscal document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{AccessKey, DocumentId, TaxId, TenantId};

/// Kind of fiscal document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Electronic invoice (model 55).
    Invoice,
    /// Electronic transport note (model 57).
    TransportNote,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::TransportNote => "transport_note",
        }
    }
}

impl core::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(DocumentKind::Invoice),
            "transport_note" => Ok(DocumentKind::TransportNote),
            other => Err(format!("unknown document kind: {other}")),
        }
    }
}

/// Whether the document was issued to or by the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Issued against the tenant (tenant is the recipient).
    Inbound,
    /// Issued by the tenant.
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Terminal authorization status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Authorized,
    Cancelled,
    Denied,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Authorized => "authorized",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Denied => "denied",
        }
    }
}

impl core::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(DocumentStatus::Authorized),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            "denied" => Ok(DocumentStatus::Denied),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

/// A decoded document on its way into the store.
///
/// Everything except `status` and `nsu` is immutable once the first insert
/// lands; later duplicate deliveries never overwrite these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingDocument {
    pub access_key: AccessKey,
    pub kind: DocumentKind,
    pub direction: Direction,
    pub issuer: TaxId,
    pub issuer_name: Option<String>,
    pub recipient: Option<TaxId>,
    /// Monetary total in smallest currency unit (cents).
    pub total_cents: i64,
    pub issued_at: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    /// Protocol number from the authorizing service, when present.
    pub protocol: Option<String>,
    /// Human-readable status reason.
    pub status_reason: Option<String>,
    /// Sequence number this delivery originated from.
    pub nsu: u64,
    /// Reference to raw payload storage.
    pub raw_ref: Option<String>,
}

/// One entry in a document's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// `None` for the initial insert.
    pub from: Option<DocumentStatus>,
    pub to: DocumentStatus,
    pub nsu: u64,
    pub changed_at: DateTime<Utc>,
}

/// A stored fiscal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub access_key: AccessKey,
    pub kind: DocumentKind,
    pub direction: Direction,
    pub issuer: TaxId,
    pub issuer_name: Option<String>,
    pub recipient: Option<TaxId>,
    pub total_cents: i64,
    pub issued_at: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    pub protocol: Option<String>,
    pub status_reason: Option<String>,
    pub nsu: u64,
    pub raw_ref: Option<String>,
    /// Manifestation registered for this document, when one was sent.
    pub manifestation: Option<String>,
    pub manifestation_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent upsert.
///
/// `Created` and `StatusChanged` each produce exactly one domain event
/// downstream; `Unchanged` produces none; this is the dedup boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    StatusChanged {
        old: DocumentStatus,
        new: DocumentStatus,
    },
    Unchanged,
}
