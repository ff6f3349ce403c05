//! Obscura - Authenticated Encryption
//!
//! AES-256-GCM over whole blobs. The envelope is the combined form
//! `nonce || ciphertext || tag`, with no plaintext header; anything too
//! short to carry a nonce and a tag is rejected up front.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use super::keys::{generate_nonce, KeyProvider, VaultKey, NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// GCM authentication tag size
const TAG_LEN: usize = 16;

/// Minimum envelope size: nonce plus tag (empty plaintext)
const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

/// Whole-blob authenticated encryption bound to the vault's single key
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Build the service from the key provider, creating the key on
    /// first use.
    pub fn new(provider: &KeyProvider) -> VaultResult<Self> {
        let key = provider.get_or_create_key()?;
        Self::with_key(&key)
    }

    /// Build the service from an explicit key (tests, in-memory vaults)
    pub fn with_key(key: &VaultKey) -> VaultResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext buffer into the combined envelope form
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Decrypt a combined envelope, failing on tampering, truncation, or
    /// a wrong key.
    pub fn decrypt(&self, envelope: &[u8]) -> VaultResult<Vec<u8>> {
        if envelope.len() < MIN_ENVELOPE_LEN {
            return Err(VaultError::DecryptionFailed("Data too short".into()));
        }

        let nonce = Nonce::from_slice(&envelope[..NONCE_LEN]);

        self.cipher
            .decrypt(nonce, &envelope[NONCE_LEN..])
            .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
    }
}
