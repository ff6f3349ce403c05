//! Obscura - Key Provisioning
//!
//! One durable 256-bit master seed, created on first use and reused for
//! the lifetime of the vault. The content key is derived from the seed
//! with HKDF-SHA256 so the same key comes back on every run. No rotation,
//! no multi-key support.

use std::fs;
use std::path::{Path, PathBuf};

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Seed file name inside the vault root
const KEY_FILE: &str = "master.key";

/// HKDF contexts for key derivation
mod contexts {
    /// Context for the content encryption key
    pub const CONTENT: &[u8] = b"OBSCURA:CONTENT:v1";
}

/// Secure key wrapper with automatic zeroization
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey {
    #[zeroize(skip)]
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

/// Provides the vault's single symmetric key.
///
/// The seed never leaves this module except wrapped in a [`VaultKey`],
/// and the key file is written before any content can be encrypted, so
/// every process sees the same key.
pub struct KeyProvider {
    key_path: PathBuf,
}

impl KeyProvider {
    /// Key provider rooted at the vault directory
    pub fn new(vault_root: &Path) -> Self {
        Self {
            key_path: vault_root.join(KEY_FILE),
        }
    }

    /// Return the content key, generating and durably storing the master
    /// seed on first use.
    pub fn get_or_create_key(&self) -> VaultResult<VaultKey> {
        let seed = if self.key_path.exists() {
            self.read_seed()?
        } else {
            self.create_seed()?
        };

        let key = derive_key(&seed, b"", contexts::CONTENT);
        let mut seed = seed;
        seed.zeroize();
        key
    }

    fn read_seed(&self) -> VaultResult<[u8; KEY_LEN]> {
        let bytes = fs::read(&self.key_path)?;
        if bytes.len() != KEY_LEN {
            return Err(VaultError::KeyDerivationFailed(format!(
                "key file has {} bytes, expected {}",
                bytes.len(),
                KEY_LEN
            )));
        }
        let mut seed = [0u8; KEY_LEN];
        seed.copy_from_slice(&bytes);
        Ok(seed)
    }

    fn create_seed(&self) -> VaultResult<[u8; KEY_LEN]> {
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut seed = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut seed);

        fs::write(&self.key_path, seed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.key_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.key_path, perms)?;
        }

        Ok(seed)
    }
}

/// Derive a key using HKDF-SHA256
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> VaultResult<VaultKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;

    Ok(VaultKey::new(okm))
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_survives_restart() {
        let dir = tempdir().unwrap();
        let k1 = KeyProvider::new(dir.path()).get_or_create_key().unwrap();
        // A second provider over the same root models a process restart
        let k2 = KeyProvider::new(dir.path()).get_or_create_key().unwrap();
        assert_eq!(k1.expose(), k2.expose());
    }

    #[test]
    fn test_different_vaults_get_different_keys() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let ka = KeyProvider::new(a.path()).get_or_create_key().unwrap();
        let kb = KeyProvider::new(b.path()).get_or_create_key().unwrap();
        assert_ne!(ka.expose(), kb.expose());
    }

    #[test]
    fn test_truncated_key_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), [0u8; 7]).unwrap();
        let result = KeyProvider::new(dir.path()).get_or_create_key();
        assert!(matches!(result, Err(VaultError::KeyDerivationFailed(_))));
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let k1 = derive_key(b"seed material", b"", contexts::CONTENT).unwrap();
        let k2 = derive_key(b"seed material", b"", contexts::CONTENT).unwrap();
        assert_eq!(k1.expose(), k2.expose());

        let k3 = derive_key(b"other seed", b"", contexts::CONTENT).unwrap();
        assert_ne!(k1.expose(), k3.expose());
    }
}
