//! At-rest encryption for credential material.
//!
//! AES-256-GCM with a random 96-bit nonce per encryption. Stored form is
//! `nonce || ciphertext || tag`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes.
const TAG_LEN: usize = 16;

/// Encryption failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Vault master-key cipher.
///
/// Key material is scrubbed from memory on drop.
pub struct VaultCrypto {
    master_key: MasterKey,
}

/// Wrapper so the key bytes are zeroed when the cipher is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterKey([u8; KEY_LEN]);

// Manual Clone: each copy of the key is still scrubbed on its own drop.
impl Clone for VaultCrypto {
    fn clone(&self) -> Self {
        Self {
            master_key: MasterKey(self.master_key.0),
        }
    }
}

impl VaultCrypto {
    pub fn new(master_key: [u8; KEY_LEN]) -> Self {
        Self {
            master_key: MasterKey(master_key),
        }
    }

    /// Build from a hex-encoded 32-byte key (the usual configuration form).
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(hex_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != KEY_LEN {
            bytes.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self::new(key))
    }

    /// Encrypt plaintext, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.master_key.0)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        use rand::rngs::OsRng;
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext || tag` back to plaintext.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt("ciphertext too short".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(&self.master_key.0)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for VaultCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCrypto")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
