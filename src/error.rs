//! Obscura - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // STORE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Photo not found: {0}")]
    PhotoNotFound(String),

    #[error("Filesystem error: {0}")]
    FileSystem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // EXPORT / IMAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Whether a batch load may skip past this error for one item and
    /// keep going with the rest of the library. Key-provider and cipher
    /// setup failures are not item-local: they doom every item, so the
    /// batch surfaces them instead.
    pub fn is_item_local(&self) -> bool {
        !matches!(
            self,
            VaultError::EncryptionFailed(_) | VaultError::KeyDerivationFailed(_)
        )
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::ImageError(e.to_string())
    }
}
