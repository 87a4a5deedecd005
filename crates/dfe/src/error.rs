//! Pull failure taxonomy.

use thiserror::Error;

/// Failure of one distribution pull.
///
/// The three variants have distinct handling downstream: `Transient` is
/// retried with capped backoff inside one sync attempt, `AuthRejected` ends
/// the attempt and flips a tenant-visible configuration flag, and
/// `SchemaMismatch` is logged and aborts only the current batch.
#[derive(Debug, Error)]
pub enum PullError {
    /// Network failure or service-busy response; safe to retry.
    #[error("transient distribution failure: {0}")]
    Transient(String),

    /// The service rejected the tenant's credential or authorization.
    #[error("distribution service rejected credentials: {0}")]
    AuthRejected(String),

    /// The response did not match the expected envelope shape.
    #[error("unexpected distribution response: {0}")]
    SchemaMismatch(String),

    /// The service processed the request but refused it (event submissions).
    #[error("distribution service refused request: {0}")]
    Rejected(String),
}
