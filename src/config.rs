//! Obscura - Settings Store
//!
//! Explicit, injected key/value settings with a load/flush lifecycle.
//! Holds UI-gate state (the PIN) and small preferences; never any
//! content-key material.
//!
//! The PIN is stored unhashed and is fully independent of the content
//! encryption key: it gates UI access only.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;

fn default_thumbnail_edge() -> u32 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    /// App-lock PIN, plaintext
    pin: Option<String>,
    /// Square thumbnail edge length in pixels
    #[serde(default = "default_thumbnail_edge")]
    thumbnail_edge: u32,
    /// Neighbors warmed on either side while browsing
    #[serde(default)]
    preload_neighbors: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pin: None,
            thumbnail_edge: default_thumbnail_edge(),
            preload_neighbors: None,
        }
    }
}

/// Typed settings store backed by one JSON file
pub struct ConfigStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl ConfigStore {
    /// Load settings from `path`, falling back to defaults when the file
    /// does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    fn flush(&self) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&*self.settings.read())?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Persist and drop the store
    pub fn close(self) -> VaultResult<()> {
        self.flush()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PIN
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_pin_set(&self) -> bool {
        self.settings.read().pin.is_some()
    }

    pub fn set_pin(&self, pin: &str) -> VaultResult<()> {
        self.settings.write().pin = Some(pin.to_string());
        self.flush()
    }

    pub fn verify_pin(&self, candidate: &str) -> bool {
        match &self.settings.read().pin {
            Some(pin) => pin == candidate,
            None => false,
        }
    }

    pub fn clear_pin(&self) -> VaultResult<()> {
        self.settings.write().pin = None;
        self.flush()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PREFERENCES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn thumbnail_edge(&self) -> u32 {
        self.settings.read().thumbnail_edge
    }

    pub fn set_thumbnail_edge(&self, edge: u32) -> VaultResult<()> {
        self.settings.write().thumbnail_edge = edge.max(16);
        self.flush()
    }

    pub fn preload_neighbors(&self) -> Option<usize> {
        self.settings.read().preload_neighbors
    }

    pub fn set_preload_neighbors(&self, count: usize) -> VaultResult<()> {
        self.settings.write().preload_neighbors = Some(count);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::open(dir.path().join("settings.json")).unwrap();

        assert!(!config.is_pin_set());
        assert_eq!(config.thumbnail_edge(), 256);
    }

    #[test]
    fn test_pin_roundtrip_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let config = ConfigStore::open(&path).unwrap();
        config.set_pin("4711").unwrap();
        assert!(config.verify_pin("4711"));
        assert!(!config.verify_pin("0000"));
        config.close().unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert!(reopened.is_pin_set());
        assert!(reopened.verify_pin("4711"));
    }

    #[test]
    fn test_unset_pin_never_verifies() {
        let dir = tempdir().unwrap();
        let config = ConfigStore::open(dir.path().join("settings.json")).unwrap();
        assert!(!config.verify_pin(""));
    }

    #[test]
    fn test_preferences_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let config = ConfigStore::open(&path).unwrap();
        config.set_thumbnail_edge(128).unwrap();
        config.set_preload_neighbors(4).unwrap();
        config.close().unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.thumbnail_edge(), 128);
        assert_eq!(reopened.preload_neighbors(), Some(4));
    }
}
