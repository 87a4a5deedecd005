//! Quarantine for undecodable distribution items.
//!
//! A malformed item must never abort the batch it arrived in; it is parked
//! here with its raw payload for later inspection, and the batch continues.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use dferelay_core::TenantId;

use crate::store::DocumentStoreError;

/// One distribution item that failed decoding or parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedItem {
    pub tenant_id: TenantId,
    /// Sequence number the item arrived under.
    pub nsu: u64,
    /// What went wrong, human-readable.
    pub reason: String,
    /// The raw base64 payload as received, for offline inspection.
    pub raw: String,
    pub quarantined_at: DateTime<Utc>,
}

/// Sink for items the decoder gave up on.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    async fn park(&self, item: QuarantinedItem) -> Result<(), DocumentStoreError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<QuarantinedItem>, DocumentStoreError>;
}

/// In-memory quarantine.
#[derive(Debug, Default)]
pub struct InMemoryQuarantineStore {
    items: Mutex<HashMap<TenantId, Vec<QuarantinedItem>>>,
}

impl InMemoryQuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuarantineStore for InMemoryQuarantineStore {
    async fn park(&self, item: QuarantinedItem) -> Result<(), DocumentStoreError> {
        warn!(
            tenant_id = %item.tenant_id,
            nsu = item.nsu,
            reason = %item.reason,
            "distribution item quarantined"
        );
        self.items
            .lock()
            .expect("quarantine lock poisoned")
            .entry(item.tenant_id)
            .or_default()
            .push(item);
        Ok(())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<QuarantinedItem>, DocumentStoreError> {
        Ok(self
            .items
            .lock()
            .expect("quarantine lock poisoned")
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
