//! Obscura - Metadata Index
//!
//! One JSON record per photo id, stored beside the blob it describes.
//! Records are independently loadable units: a corrupt record takes down
//! exactly one photo, never the listing of the rest.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{VaultError, VaultResult};
use crate::photo::{PhotoQuery, PhotoRecord};
use crate::store::ContentStore;

/// Structured per-photo records with predicate queries
pub struct MetadataIndex {
    store: Arc<ContentStore>,
}

impl MetadataIndex {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, record: &PhotoRecord) -> VaultResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        self.store.save_record(&record.id, &bytes)
    }

    /// Load one record. `None` when no record exists; a record that
    /// exists but does not parse is an error, not an absence.
    pub fn load(&self, id: &str) -> VaultResult<Option<PhotoRecord>> {
        let bytes = match self.store.load_record(id) {
            Ok(bytes) => bytes,
            Err(VaultError::PhotoNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let record = serde_json::from_slice(&bytes)?;
        Ok(Some(record))
    }

    /// Every readable record, newest creation date first. Unparseable
    /// records are logged and skipped; only a failed directory
    /// enumeration (or a failure that dooms every record alike) fails
    /// the call.
    pub fn load_all(&self) -> VaultResult<Vec<PhotoRecord>> {
        let ids = self.store.list_record_ids()?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) if e.is_item_local() => {
                    log::warn!("skipping unreadable record {}: {}", id, e)
                }
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Full-replace update: the entire record is written back with a
    /// refreshed modification date. Callers racing on read-modify-write
    /// must serialize per id (the repository holds that lock).
    pub fn update(&self, mut record: PhotoRecord) -> VaultResult<PhotoRecord> {
        record.modified_at = Utc::now();
        self.save(&record)?;
        Ok(record)
    }

    pub fn delete(&self, id: &str) -> VaultResult<()> {
        self.store.delete_record(id)
    }

    /// Records matching every supplied query clause
    pub fn find_matching(&self, query: &PhotoQuery) -> VaultResult<Vec<PhotoRecord>> {
        let all = self.load_all()?;
        Ok(all.into_iter().filter(|r| query.matches(r)).collect())
    }
}
