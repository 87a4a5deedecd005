//! Per-call client identity.
//!
//! The identity is the only place decrypted credential material ever lives
//! outside the vault, and it is scoped to one protocol call. Key bytes are
//! zeroed on drop.

use zeroize::{Zeroize, ZeroizeOnDrop};

use dferelay_core::{Environment, TaxId};

/// Credential material inside an issued identity.
#[derive(Zeroize, ZeroizeOnDrop)]
pub enum IdentityMaterial {
    /// Mutual-TLS client certificate + key, PEM encoded.
    Tls { cert_pem: Vec<u8>, key_pem: Vec<u8> },
    /// Portal-issued access code sent in the request body.
    AccessCode { code: String },
    /// No credential; only public per-key lookups are possible.
    Public,
}

/// Short-lived signing context for one protocol call.
pub struct ClientIdentity {
    pub tax_id: TaxId,
    pub environment: Environment,
    pub material: IdentityMaterial,
}

impl ClientIdentity {
    /// Whether this identity can authenticate an incremental distribution pull.
    pub fn supports_pull(&self) -> bool {
        !matches!(self.material, IdentityMaterial::Public)
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.material {
            IdentityMaterial::Tls { .. } => "tls",
            IdentityMaterial::AccessCode { .. } => "access_code",
            IdentityMaterial::Public => "public",
        };
        f.debug_struct("ClientIdentity")
            .field("tax_id", &self.tax_id)
            .field("environment", &self.environment)
            .field("material", &mode)
            .finish()
    }
}
