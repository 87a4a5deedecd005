//! Timer-driven sync coordinator.
//!
//! Each tick computes the eligible tenants, takes per-tenant leases, and
//! fans passes out to a bounded set of workers. Tenants beyond the
//! concurrency cap wait for the next tick rather than queueing unboundedly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use dferelay_billing::{EligibilityGate, TenantStore};
use dferelay_core::{Clock, TenantId};
use dferelay_vault::CredentialVault;

use crate::lease::LeaseTable;
use crate::runner::{SkipReason, SyncError, SyncOutcome, TenantSync};

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Maximum tenant passes in flight per tick.
    pub max_concurrent: usize,
    /// After this long a lease is considered abandoned and reclaimed.
    pub lease_stale_after: ChronoDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_concurrent: 8,
            lease_stale_after: ChronoDuration::minutes(30),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub eligible: usize,
    pub dispatched: usize,
    /// Skipped because a previous pass still holds the lease.
    pub skipped_leased: usize,
    /// Skipped because the concurrency cap was reached this tick.
    pub skipped_capacity: usize,
}

/// Periodic fan-out of sync passes.
pub struct SyncScheduler {
    tenants: Arc<dyn TenantStore>,
    vault: Arc<CredentialVault>,
    sync: Arc<dyn TenantSync>,
    leases: LeaseTable,
    gate: EligibilityGate,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl SyncScheduler {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        vault: Arc<CredentialVault>,
        sync: Arc<dyn TenantSync>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tenants,
            vault,
            sync,
            leases: LeaseTable::new(config.lease_stale_after),
            gate: EligibilityGate,
            clock,
            config,
        }
    }

    /// One scheduling pass. Awaits every dispatched sync, so ticks are
    /// deterministic under test and leases are always released by tick end.
    pub async fn tick(&self) -> Result<TickSummary, SyncError> {
        let now = self.clock.now();
        let mut summary = TickSummary::default();
        let mut tasks = JoinSet::new();

        for tenant in self.tenants.list().await? {
            let credential_expiry = match self.vault.credential_expiry(tenant.id).await {
                Ok(expiry) => expiry,
                Err(e) => {
                    error!(tenant_id = %tenant.id, error = %e, "credential lookup failed");
                    continue;
                }
            };
            // Trial tenants past their window still pass here; the runner
            // fires the expiry transition and then skips them.
            if !self.gate.eligible(&tenant, credential_expiry, now) && !tenant.trial_expired(now)
            {
                continue;
            }
            summary.eligible += 1;

            if summary.dispatched >= self.config.max_concurrent {
                summary.skipped_capacity += 1;
                continue;
            }
            let Some(guard) = self.leases.try_acquire(tenant.id, now) else {
                debug!(tenant_id = %tenant.id, "lease held, skipping tick");
                summary.skipped_leased += 1;
                continue;
            };
            summary.dispatched += 1;

            let sync = Arc::clone(&self.sync);
            let tenant_id = tenant.id;
            tasks.spawn(async move {
                let result = sync.sync_tenant(tenant_id).await;
                match &result {
                    Ok(SyncOutcome::Completed(report)) => {
                        debug!(tenant_id = %tenant_id, cursor = report.final_cursor, "pass completed");
                    }
                    Ok(SyncOutcome::Skipped(reason)) => {
                        debug!(tenant_id = %tenant_id, reason = ?reason, "pass skipped");
                    }
                    Err(e) => {
                        // Failures are isolated per tenant; the scheduler
                        // keeps going.
                        error!(tenant_id = %tenant_id, error = %e, "pass failed");
                    }
                }
                drop(guard);
            });
        }

        while tasks.join_next().await.is_some() {}

        info!(
            eligible = summary.eligible,
            dispatched = summary.dispatched,
            skipped_leased = summary.skipped_leased,
            skipped_capacity = summary.skipped_capacity,
            "scheduler tick complete"
        );
        Ok(summary)
    }

    /// Out-of-band pass for one tenant, subject to the same gate and lease.
    pub async fn sync_now(&self, tenant_id: TenantId) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = self.leases.try_acquire(tenant_id, self.clock.now()) else {
            return Ok(SyncOutcome::Skipped(SkipReason::LeaseHeld));
        };
        self.sync.sync_tenant(tenant_id).await
    }

    /// Run ticks until the process stops.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as CDuration, Utc};
    use dferelay_billing::{BillingEvent, InMemoryTenantStore, Tenant};
    use dferelay_core::{SystemClock, TaxId};
    use dferelay_vault::{InMemoryCredentialStore, VaultCrypto};
    use std::sync::Mutex;

    use crate::runner::SyncReport;

    /// Records which tenants were dispatched.
    struct RecordingSync {
        calls: Mutex<Vec<TenantId>>,
    }

    impl RecordingSync {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<TenantId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TenantSync for RecordingSync {
        async fn sync_tenant(&self, tenant_id: TenantId) -> Result<SyncOutcome, SyncError> {
            self.calls.lock().unwrap().push(tenant_id);
            Ok(SyncOutcome::Completed(SyncReport::default()))
        }
    }

    struct Harness {
        scheduler: SyncScheduler,
        tenants: Arc<InMemoryTenantStore>,
        vault: Arc<CredentialVault>,
        sync: Arc<RecordingSync>,
    }

    fn harness(config: SchedulerConfig) -> Harness {
        let tenants = Arc::new(InMemoryTenantStore::new());
        let vault = Arc::new(CredentialVault::new(
            VaultCrypto::new([1u8; 32]),
            Arc::new(InMemoryCredentialStore::new()),
        ));
        let sync = Arc::new(RecordingSync::new());
        let scheduler = SyncScheduler::new(
            Arc::clone(&tenants) as Arc<dyn TenantStore>,
            Arc::clone(&vault),
            Arc::clone(&sync) as Arc<dyn TenantSync>,
            Arc::new(SystemClock),
            config,
        );
        Harness {
            scheduler,
            tenants,
            vault,
            sync,
        }
    }

    async fn eligible_tenant(h: &Harness) -> Tenant {
        let tenant = Tenant::new(
            TaxId::parse("98765432000198").unwrap(),
            Utc::now() + CDuration::days(14),
        );
        h.tenants.insert(tenant.clone()).await.unwrap();
        h.vault
            .store_access_code(tenant.id, "code", Utc::now() + CDuration::days(30))
            .await
            .unwrap();
        tenant
    }

    #[tokio::test]
    async fn tick_dispatches_eligible_tenants() {
        let h = harness(SchedulerConfig::default());
        let a = eligible_tenant(&h).await;
        let b = eligible_tenant(&h).await;

        let summary = h.scheduler.tick().await.unwrap();
        assert_eq!(summary.eligible, 2);
        assert_eq!(summary.dispatched, 2);

        let calls = h.sync.calls();
        assert!(calls.contains(&a.id));
        assert!(calls.contains(&b.id));
    }

    #[tokio::test]
    async fn blocked_tenant_is_never_selected() {
        let h = harness(SchedulerConfig::default());
        let tenant = eligible_tenant(&h).await;
        // Valid certificate, stale cursor, but blocked.
        h.tenants
            .apply_event(tenant.id, BillingEvent::TrialExpired)
            .await
            .unwrap();

        let summary = h.scheduler.tick().await.unwrap();
        assert_eq!(summary.eligible, 0);
        assert!(h.sync.calls().is_empty());
    }

    #[tokio::test]
    async fn tenant_without_credential_is_not_dispatched() {
        let h = harness(SchedulerConfig::default());
        let tenant = Tenant::new(
            TaxId::parse("98765432000198").unwrap(),
            Utc::now() + CDuration::days(14),
        );
        h.tenants.insert(tenant).await.unwrap();

        let summary = h.scheduler.tick().await.unwrap();
        assert_eq!(summary.dispatched, 0);
        assert!(h.sync.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrency_cap_defers_excess_tenants_to_next_tick() {
        let h = harness(SchedulerConfig {
            max_concurrent: 2,
            ..SchedulerConfig::default()
        });
        for _ in 0..3 {
            eligible_tenant(&h).await;
        }

        let summary = h.scheduler.tick().await.unwrap();
        assert_eq!(summary.eligible, 3);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.skipped_capacity, 1);

        // The deferred tenant gets its turn on the next tick.
        let summary = h.scheduler.tick().await.unwrap();
        assert_eq!(summary.dispatched, 2);
    }

    #[tokio::test]
    async fn sync_now_respects_lease() {
        let h = harness(SchedulerConfig::default());
        let tenant = eligible_tenant(&h).await;

        let guard = h
            .scheduler
            .leases
            .try_acquire(tenant.id, Utc::now())
            .unwrap();
        let outcome = h.scheduler.sync_now(tenant.id).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::LeaseHeld));
        assert!(h.sync.calls().is_empty());
        drop(guard);

        let outcome = h.scheduler.sync_now(tenant.id).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
    }
}
