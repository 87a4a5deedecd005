//! Stored credential records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dferelay_core::{CertificateId, TenantId};

/// Which of the three mutually exclusive credential modes a record holds.
///
/// Each mode satisfies the same `issue_identity`/`pull` contract; selection
/// is a tagged variant per tenant, never runtime type inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CredentialMode {
    /// Digital certificate: encrypted PKCS#12 container.
    Certificate {
        /// AES-256-GCM output, `nonce || ciphertext || tag`.
        encrypted_container: Vec<u8>,
        /// Encrypted container password, same envelope.
        encrypted_password: Vec<u8>,
        /// Subject common name.
        holder: String,
        /// Hex SHA-256 of the leaf certificate.
        fingerprint: String,
    },
    /// Portal-issued access code.
    AccessCode { encrypted_code: Vec<u8> },
    /// No credential; public per-key lookup only.
    PublicLookup,
}

impl CredentialMode {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialMode::Certificate { .. } => "certificate",
            CredentialMode::AccessCode { .. } => "access_code",
            CredentialMode::PublicLookup => "public_lookup",
        }
    }
}

/// One tenant's stored credential.
///
/// Replaced on re-upload; kept for audit until explicit removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: CertificateId,
    pub tenant_id: TenantId,
    pub mode: CredentialMode,
    /// Validity end; the vault fails closed once this passes.
    pub expires_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
