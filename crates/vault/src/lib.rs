//! `dferelay-vault`: per-tenant signing credentials at rest.
//!
//! Credential containers are stored encrypted (AES-256-GCM under a vault
//! master key) and only ever decrypted inside [`CredentialVault::issue_identity`].
//! The decrypted material lives in the returned [`ClientIdentity`], which is
//! scoped to a single protocol call and zeroed on drop.

pub mod container;
pub mod crypto;
pub mod identity;
pub mod record;
pub mod store;
pub mod vault;

pub use container::ContainerInfo;
pub use crypto::VaultCrypto;
pub use identity::{ClientIdentity, IdentityMaterial};
pub use record::{CredentialMode, CredentialRecord};
pub use store::{CredentialStore, CredentialStoreError, InMemoryCredentialStore, PgCredentialStore};
pub use vault::{CredentialVault, VaultError};
