//! Infrastructure wiring.
//!
//! Defaults to in-memory stores for local development; production wiring
//! swaps in the Postgres-backed stores behind the same traits.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use dferelay_billing::{InMemoryTenantStore, TenantStore};
use dferelay_core::{Clock, SystemClock};
use dferelay_dfe::{DistributionService, HttpDistributionService, ManifestationService};
use dferelay_documents::{
    AlertStore, DocumentStore, InMemoryAlertStore, InMemoryDocumentStore,
    InMemoryQuarantineStore, QuarantineStore,
};
use dferelay_sync::{
    CursorStore, InMemoryCursorStore, SchedulerConfig, SyncRunner, SyncScheduler, TenantSync,
};
use dferelay_vault::{CredentialVault, InMemoryCredentialStore, VaultCrypto};
use dferelay_webhooks::{
    DeliveryStore, DeliveryWorker, EndpointStore, HttpTransport, InMemoryDeliveryStore,
    InMemoryEndpointStore,
};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub tenants: Arc<dyn TenantStore>,
    pub vault: Arc<CredentialVault>,
    pub documents: Arc<dyn DocumentStore>,
    pub quarantine: Arc<dyn QuarantineStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub manifester: Arc<dyn ManifestationService>,
    pub cursors: Arc<dyn CursorStore>,
    pub endpoints: Arc<dyn EndpointStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub scheduler: Arc<SyncScheduler>,
    pub worker: Arc<DeliveryWorker>,
}

/// Delivery timeout for webhook POSTs.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

pub fn build_services() -> anyhow::Result<Arc<AppServices>> {
    let master_key = vault_master_key()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tenants: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::new());
    let vault = Arc::new(CredentialVault::new(
        VaultCrypto::new(master_key),
        Arc::new(InMemoryCredentialStore::new()),
    ));
    let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let quarantine: Arc<dyn QuarantineStore> = Arc::new(InMemoryQuarantineStore::new());
    let alerts: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
    let cursors: Arc<dyn CursorStore> = Arc::new(InMemoryCursorStore::new());
    let endpoints: Arc<dyn EndpointStore> = Arc::new(InMemoryEndpointStore::new());
    let deliveries: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());

    let transport = HttpTransport::new(DELIVERY_TIMEOUT)
        .map_err(|e| anyhow::anyhow!("delivery transport: {e}"))?;
    let worker = Arc::new(
        DeliveryWorker::new(
            Arc::clone(&deliveries),
            Arc::clone(&endpoints),
            Arc::new(transport),
        )
        .with_clock(Arc::clone(&clock)),
    );

    // One HTTP client serves both the distribution pull and event submission.
    let dfe_client = Arc::new(HttpDistributionService::new());
    let service: Arc<dyn DistributionService> = Arc::clone(&dfe_client) as _;
    let manifester: Arc<dyn ManifestationService> = dfe_client;
    let runner: Arc<dyn TenantSync> = Arc::new(SyncRunner::new(
        Arc::clone(&tenants),
        Arc::clone(&vault),
        service,
        Arc::clone(&documents),
        Arc::clone(&quarantine),
        Arc::clone(&alerts),
        Arc::clone(&cursors),
        Arc::clone(&worker),
        Arc::clone(&clock),
    ));
    let scheduler = Arc::new(SyncScheduler::new(
        Arc::clone(&tenants),
        Arc::clone(&vault),
        runner,
        Arc::clone(&clock),
        SchedulerConfig::default(),
    ));

    Ok(Arc::new(AppServices {
        tenants,
        vault,
        documents,
        quarantine,
        alerts,
        manifester,
        cursors,
        endpoints,
        deliveries,
        scheduler,
        worker,
    }))
}

/// 32-byte vault master key from `VAULT_MASTER_KEY` (hex), with an insecure
/// dev fallback.
fn vault_master_key() -> anyhow::Result<[u8; 32]> {
    match std::env::var("VAULT_MASTER_KEY") {
        Ok(hex_key) => {
            let bytes = hex::decode(hex_key.trim())
                .map_err(|e| anyhow::anyhow!("VAULT_MASTER_KEY is not valid hex: {e}"))?;
            bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("VAULT_MASTER_KEY must be 32 bytes of hex"))
        }
        Err(_) => {
            warn!("VAULT_MASTER_KEY not set; using insecure dev default");
            Ok([0u8; 32])
        }
    }
}
