//! Obscura - Crypto Layer
//!
//! Key provisioning and authenticated encryption.

pub mod aead;
pub mod keys;

pub use aead::EncryptionService;
pub use keys::{KeyProvider, VaultKey, KEY_LEN, NONCE_LEN};
