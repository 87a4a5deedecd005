//! `dferelay-sync`: the per-tenant sync pipeline and its scheduler.
//!
//! Each eligible tenant gets one incremental pull pass: gate check, vault
//! identity, pull loop, decode, idempotent upsert, event fan-out. A scheduler
//! drives passes on a fixed interval with bounded concurrency and per-tenant
//! mutual exclusion, so two passes never race on the same cursor.

pub mod cursor;
pub mod lease;
pub mod runner;
pub mod scheduler;

pub use cursor::{CursorStore, InMemoryCursorStore, PgCursorStore, SyncCursor};
pub use lease::{LeaseGuard, LeaseTable};
pub use runner::{SkipReason, SyncError, SyncOutcome, SyncReport, SyncRunner, TenantSync};
pub use scheduler::{SchedulerConfig, SyncScheduler, TickSummary};
