//! The credential vault.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use dferelay_core::{CertificateId, Environment, TaxId, TenantId};

use crate::container::{self, ContainerError};
use crate::crypto::{CryptoError, VaultCrypto};
use crate::identity::{ClientIdentity, IdentityMaterial};
use crate::record::{CredentialMode, CredentialRecord};
use crate::store::{CredentialStore, CredentialStoreError};

/// Vault operation failure.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Uploaded bytes are not a valid credential container.
    #[error("invalid credential container: {0}")]
    InvalidContainer(String),

    /// The container is valid but the password does not open it.
    #[error("wrong container password")]
    WrongPassword,

    /// No credential is configured for the tenant.
    #[error("no credential configured")]
    NotConfigured,

    /// The stored credential is past its validity date.
    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] CredentialStoreError),
}

impl From<ContainerError> for VaultError {
    fn from(e: ContainerError) -> Self {
        match e {
            ContainerError::InvalidContainer(msg) => VaultError::InvalidContainer(msg),
            ContainerError::WrongPassword => VaultError::WrongPassword,
        }
    }
}

/// Holds per-tenant encrypted signing credentials and issues short-lived
/// client identities for protocol calls.
///
/// Decryption happens only inside [`CredentialVault::issue_identity`]; no
/// caller ever sees a credential in decrypted form outside one call's
/// lifetime.
pub struct CredentialVault {
    crypto: VaultCrypto,
    store: Arc<dyn CredentialStore>,
}

impl CredentialVault {
    pub fn new(crypto: VaultCrypto, store: Arc<dyn CredentialStore>) -> Self {
        Self { crypto, store }
    }

    /// Validate and store an uploaded credential container.
    ///
    /// The container is parsed once to extract metadata and verify the
    /// password, then persisted encrypted. Re-upload replaces the previous
    /// record.
    pub async fn store_certificate(
        &self,
        tenant_id: TenantId,
        container_bytes: &[u8],
        password: &str,
    ) -> Result<CredentialRecord, VaultError> {
        let info = container::parse(container_bytes, password)?;

        let record = CredentialRecord {
            id: CertificateId::new(),
            tenant_id,
            mode: CredentialMode::Certificate {
                encrypted_container: self.crypto.encrypt(container_bytes)?,
                encrypted_password: self.crypto.encrypt(password.as_bytes())?,
                holder: info.holder.clone(),
                fingerprint: info.fingerprint.clone(),
            },
            expires_at: info.expires_at,
            uploaded_at: Utc::now(),
        };
        self.store.put(record.clone()).await?;

        info!(
            tenant_id = %tenant_id,
            holder = %info.holder,
            fingerprint = %info.fingerprint,
            expires_at = %info.expires_at,
            "credential container stored"
        );
        Ok(record)
    }

    /// Store a portal-issued access code with its validity window.
    pub async fn store_access_code(
        &self,
        tenant_id: TenantId,
        code: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<CredentialRecord, VaultError> {
        let record = CredentialRecord {
            id: CertificateId::new(),
            tenant_id,
            mode: CredentialMode::AccessCode {
                encrypted_code: self.crypto.encrypt(code.as_bytes())?,
            },
            expires_at: valid_until,
            uploaded_at: Utc::now(),
        };
        self.store.put(record.clone()).await?;
        info!(tenant_id = %tenant_id, "access code stored");
        Ok(record)
    }

    /// Produce an ephemeral signing context for one protocol call.
    ///
    /// Expiry is checked against the stored validity date before any
    /// decryption; an expired credential fails closed.
    pub async fn issue_identity(
        &self,
        tenant_id: TenantId,
        tax_id: TaxId,
        environment: Environment,
    ) -> Result<ClientIdentity, VaultError> {
        let record = self
            .store
            .get(tenant_id)
            .await?
            .ok_or(VaultError::NotConfigured)?;

        if record.expired(Utc::now()) {
            return Err(VaultError::Expired(record.expires_at));
        }

        let material = match &record.mode {
            CredentialMode::Certificate {
                encrypted_container,
                encrypted_password,
                ..
            } => {
                let container_bytes = self.crypto.decrypt(encrypted_container)?;
                let password_bytes = self.crypto.decrypt(encrypted_password)?;
                let password = String::from_utf8(password_bytes)
                    .map_err(|e| VaultError::InvalidContainer(e.to_string()))?;
                let info = container::parse(&container_bytes, &password)?;
                IdentityMaterial::Tls {
                    cert_pem: info.cert_pem,
                    key_pem: info.key_pem,
                }
            }
            CredentialMode::AccessCode { encrypted_code } => {
                let code_bytes = self.crypto.decrypt(encrypted_code)?;
                let code = String::from_utf8(code_bytes)
                    .map_err(|e| VaultError::InvalidContainer(e.to_string()))?;
                IdentityMaterial::AccessCode { code }
            }
            CredentialMode::PublicLookup => IdentityMaterial::Public,
        };

        Ok(ClientIdentity {
            tax_id,
            environment,
            material,
        })
    }

    /// Validity end of the tenant's credential, if one is configured.
    ///
    /// The eligibility gate consumes this; `None` means not configured.
    pub async fn credential_expiry(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<DateTime<Utc>>, VaultError> {
        Ok(self.store.get(tenant_id).await?.map(|r| r.expires_at))
    }

    /// Whether any credential is configured (dashboard flag).
    pub async fn configured(&self, tenant_id: TenantId) -> Result<bool, VaultError> {
        Ok(self.store.get(tenant_id).await?.is_some())
    }

    /// Explicitly remove a tenant's credential.
    pub async fn remove(&self, tenant_id: TenantId) -> Result<(), VaultError> {
        self.store.remove(tenant_id).await?;
        info!(tenant_id = %tenant_id, "credential removed");
        Ok(())
    }
}
