//! Obscura - Photo Data Model
//!
//! Persisted metadata records plus the transient, per-call photo handle
//! the repository hands back to callers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::DynamicImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Destructive pixel transform applied to selected face regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    None,
    Blackout,
    Pixelate,
    Blur,
    Noise,
}

impl Default for MaskMode {
    fn default() -> Self {
        MaskMode::None
    }
}

/// Axis-aligned face rectangle in source-image pixel coordinates.
///
/// Coordinates are absolute pixel units of the full-resolution image,
/// never normalized. Conversion to display space is a presentation
/// concern and is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Masking target
    pub is_selected: bool,
    /// Manually drawn, as opposed to detector-produced
    pub is_user_created: bool,
}

impl FaceRegion {
    /// Detector-produced region, selected for masking by default
    pub fn detected(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            is_selected: true,
            is_user_created: false,
        }
    }

    /// User-drawn region
    pub fn user_drawn(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            is_selected: true,
            is_user_created: true,
        }
    }
}

/// Persisted photo metadata, one record per id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Stable opaque id, created once, never reused
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every metadata rewrite
    pub modified_at: DateTime<Utc>,
    /// Plaintext content length in bytes
    pub file_size_bytes: u64,
    /// Ordered face list
    #[serde(default)]
    pub faces: Vec<FaceRegion>,
    #[serde(default)]
    pub mask_mode: MaskMode,
    #[serde(default)]
    pub is_decoy: bool,
    /// Location tags captured at save time, if a provider was available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_tags: Option<BTreeMap<String, String>>,
}

impl PhotoRecord {
    /// Fresh record for newly imported content
    pub fn new(id: String, file_size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            modified_at: now,
            file_size_bytes,
            faces: Vec::new(),
            mask_mode: MaskMode::None,
            is_decoy: false,
            location_tags: None,
        }
    }

    pub fn has_faces(&self) -> bool {
        !self.faces.is_empty()
    }
}

/// Conjunctive metadata filter: every supplied clause must hold,
/// omitted clauses impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct PhotoQuery {
    /// Inclusive creation-date range
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub has_faces: Option<bool>,
    pub mask_mode: Option<MaskMode>,
}

impl PhotoQuery {
    pub fn matches(&self, record: &PhotoRecord) -> bool {
        if let Some((from, to)) = self.date_range {
            if record.created_at < from || record.created_at > to {
                return false;
            }
        }
        if let Some(wants_faces) = self.has_faces {
            if record.has_faces() != wants_faces {
                return false;
            }
        }
        if let Some(mode) = self.mask_mode {
            if record.mask_mode != mode {
                return false;
            }
        }
        true
    }
}

/// Shared runtime state the memory manager tracks per photo
pub struct PhotoState {
    visible: AtomicBool,
    last_access: Mutex<Instant>,
}

impl PhotoState {
    pub fn new() -> Self {
        Self {
            visible: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
        if visible {
            self.touch();
        }
    }

    /// Record an access
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

impl Default for PhotoState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient decrypted photo handle, created fresh on every load/save.
///
/// The decoded image handles are clones of cache-owned entries: the cache
/// may drop its entry at any time without invalidating this handle, and
/// holding the handle does not keep the cache entry alive.
pub struct SecurePhoto {
    pub id: String,
    pub record: PhotoRecord,
    /// Decrypted content bytes; absent when the load was served entirely
    /// from cache without touching the content store
    pub bytes: Option<Vec<u8>>,
    /// Decoded full image, when the content decodes as an image
    pub image: Option<Arc<DynamicImage>>,
    pub thumbnail: Option<Arc<DynamicImage>>,
    pub state: Arc<PhotoState>,
}

impl SecurePhoto {
    pub fn is_visible(&self) -> bool {
        self.state.is_visible()
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.set_visible(visible)
    }
}
