//! Obscura - Content Store
//!
//! Durable storage for encrypted blobs and their metadata records, side
//! by side in one root directory associated by filename stem. The root
//! is created lazily on first use and carries a `CACHEDIR.TAG` marker so
//! backup tools exclude it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;

use crate::error::{VaultError, VaultResult};

/// Encrypted blob extension
const BLOB_EXT: &str = "enc";

/// Metadata record extension
const RECORD_EXT: &str = "json";

/// Standard cache-directory marker recognized by backup tools
const BACKUP_EXCLUDE_TAG: &str = "CACHEDIR.TAG";

const BACKUP_EXCLUDE_CONTENT: &str =
    "Signature: 8a477f597d28d172789f06886806bc55\n# Vault content, excluded from backups.\n";

/// Generate a photo id: a sortable UTC timestamp plus a short random
/// suffix, so two ids minted in the same timer tick never collide.
pub fn generate_photo_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{}-{}", stamp, hex::encode(suffix))
}

/// Blob and record file storage rooted at one directory
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory and its backup-exclusion marker.
    /// Failure here is fatal to the whole store.
    fn ensure_root(&self) -> VaultResult<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|e| {
                VaultError::FileSystem(format!(
                    "cannot create store root {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }

        let tag = self.root.join(BACKUP_EXCLUDE_TAG);
        if !tag.exists() {
            fs::write(&tag, BACKUP_EXCLUDE_CONTENT)?;
        }

        Ok(())
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, BLOB_EXT))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, RECORD_EXT))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BLOBS
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a ciphertext blob, returning its location
    pub fn save_blob(&self, id: &str, ciphertext: &[u8]) -> VaultResult<PathBuf> {
        self.ensure_root()?;
        let path = self.blob_path(id);
        self.write_atomic(&path, ciphertext)?;
        Ok(path)
    }

    pub fn load_blob(&self, id: &str) -> VaultResult<Vec<u8>> {
        let path = self.blob_path(id);
        if !path.exists() {
            return Err(VaultError::PhotoNotFound(id.to_string()));
        }
        Ok(fs::read(&path)?)
    }

    pub fn blob_exists(&self, id: &str) -> bool {
        self.blob_path(id).exists()
    }

    /// Delete a blob. Deleting an absent id is not an error.
    pub fn delete_blob(&self, id: &str) -> VaultResult<()> {
        self.delete_file(&self.blob_path(id))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECORDS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn save_record(&self, id: &str, bytes: &[u8]) -> VaultResult<()> {
        self.ensure_root()?;
        self.write_atomic(&self.record_path(id), bytes)
    }

    pub fn load_record(&self, id: &str) -> VaultResult<Vec<u8>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(VaultError::PhotoNotFound(id.to_string()));
        }
        Ok(fs::read(&path)?)
    }

    pub fn record_exists(&self, id: &str) -> bool {
        self.record_path(id).exists()
    }

    pub fn delete_record(&self, id: &str) -> VaultResult<()> {
        self.delete_file(&self.record_path(id))
    }

    /// Ids of every metadata record in the store, skipping files that are
    /// not records (markers, temp files, stray content).
    pub fn list_record_ids(&self) -> VaultResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("unreadable store entry skipped: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => ids.push(stem.to_string()),
                None => log::debug!("record with non-utf8 stem skipped: {}", path.display()),
            }
        }

        Ok(ids)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Write to a temp file first, then rename into place
    fn write_atomic(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        file.write_all(data)?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Best-effort zero overwrite, then remove. Absent files succeed.
    fn delete_file(&self, path: &Path) -> VaultResult<()> {
        if !path.exists() {
            return Ok(());
        }

        if let Ok(metadata) = fs::metadata(path) {
            let size = metadata.len() as usize;
            if size > 0 {
                if let Ok(mut file) = OpenOptions::new().write(true).open(path) {
                    let zeros = vec![0u8; size.min(1024 * 1024)];
                    let mut remaining = size;
                    while remaining > 0 {
                        let to_write = remaining.min(zeros.len());
                        let _ = file.write_all(&zeros[..to_write]);
                        remaining -= to_write;
                    }
                    let _ = file.sync_all();
                }
            }
        }

        fs::remove_file(path)?;
        Ok(())
    }
}
