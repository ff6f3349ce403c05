//! Obscura - Memory Manager
//!
//! Visibility-aware reclamation over the image cache. Consumers keep the
//! cooperative load/unload reporting protocol, but resident counts are
//! read from the cache itself, so a missed or doubled report can shift
//! timing, never correctness.
//!
//! Thresholds: at most 3 resident full images, at most 30 thumbnails,
//! and thumbnails expire after 60 seconds without access. Photos marked
//! visible are never evicted, regardless of age.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::ImageCache;
use crate::photo::PhotoState;

/// Reclamation thresholds
#[derive(Debug, Clone, Copy)]
pub struct MemoryPolicy {
    pub max_resident_images: usize,
    pub max_resident_thumbnails: usize,
    pub thumbnail_idle_expiry: Duration,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            max_resident_images: 3,
            max_resident_thumbnails: 30,
            thumbnail_idle_expiry: Duration::from_secs(60),
        }
    }
}

/// Process-wide eviction policy over registered photo handles
pub struct MemoryManager {
    cache: Arc<ImageCache>,
    policy: MemoryPolicy,
    /// Single mutual-exclusion boundary for the registry and threshold
    /// sweeps; individual cache evictions happen outside any shared lock
    /// the readers care about.
    registry: Mutex<HashMap<String, Arc<PhotoState>>>,
}

impl MemoryManager {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self::with_policy(cache, MemoryPolicy::default())
    }

    pub fn with_policy(cache: Arc<ImageCache>, policy: MemoryPolicy) -> Self {
        Self {
            cache,
            policy,
            registry: Mutex::new(HashMap::new()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REGISTRATION & VISIBILITY
    // ═══════════════════════════════════════════════════════════════════════

    /// Track a photo handle. Idempotent per id; the latest state wins.
    pub fn register(&self, id: &str, state: Arc<PhotoState>) {
        self.registry.lock().insert(id.to_string(), state);
    }

    /// Stop tracking a photo (deletion path)
    pub fn forget(&self, id: &str) {
        self.registry.lock().remove(id);
    }

    /// The registered state for an id, if any. Repeated loads of the
    /// same photo share one state so visibility survives reloads.
    pub fn state_of(&self, id: &str) -> Option<Arc<PhotoState>> {
        self.registry.lock().get(id).cloned()
    }

    /// Presentation-layer visibility report. Visible photos are exempt
    /// from eviction; clearing visibility makes them candidates again.
    pub fn set_visible(&self, id: &str, visible: bool) {
        if let Some(state) = self.registry.lock().get(id) {
            state.set_visible(visible);
        }
    }

    pub fn touch(&self, id: &str) {
        if let Some(state) = self.registry.lock().get(id) {
            state.touch();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // COOPERATIVE REPORTS
    // ═══════════════════════════════════════════════════════════════════════

    /// A consumer decoded a full image into the cache
    pub fn report_image_loaded(&self, id: &str) {
        self.touch(id);
        self.enforce();
    }

    /// A consumer is done with a full image
    pub fn report_image_unloaded(&self, id: &str) {
        self.cache.evict_image(id);
        self.enforce();
    }

    pub fn report_thumbnail_loaded(&self, id: &str) {
        self.touch(id);
        self.enforce();
    }

    pub fn report_thumbnail_unloaded(&self, id: &str) {
        self.cache.evict_thumbnail(id);
        self.enforce();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // COUNTERS (cache-derived)
    // ═══════════════════════════════════════════════════════════════════════

    pub fn resident_image_count(&self) -> usize {
        self.cache.image_count()
    }

    pub fn resident_thumbnail_count(&self) -> usize {
        self.cache.thumbnail_count()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECLAMATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Synchronous threshold sweep; runs on whatever thread reported.
    pub fn enforce(&self) {
        let registry = self.registry.lock();

        let is_visible = |id: &str| {
            registry
                .get(id)
                .map(|state| state.is_visible())
                .unwrap_or(false)
        };

        // Idle thumbnail expiry
        for id in self
            .cache
            .thumbnails_idle_longer_than(self.policy.thumbnail_idle_expiry)
        {
            if !is_visible(&id) {
                self.cache.evict_thumbnail(&id);
                log::debug!("expired idle thumbnail {}", id);
            }
        }

        // Full-image cap, oldest access first, visible photos exempt
        while self.cache.image_count() > self.policy.max_resident_images {
            let candidate = self
                .cache
                .images_by_age()
                .into_iter()
                .find(|id| !is_visible(id));
            match candidate {
                Some(id) => {
                    self.cache.evict_image(&id);
                    log::debug!("evicted full image {}", id);
                }
                None => break,
            }
        }

        // Thumbnail cap
        while self.cache.thumbnail_count() > self.policy.max_resident_thumbnails {
            let candidate = self
                .cache
                .thumbnails_by_age()
                .into_iter()
                .find(|id| !is_visible(id));
            match candidate {
                Some(id) => {
                    self.cache.evict_thumbnail(&id);
                }
                None => break,
            }
        }
    }

    /// Hard reset: clear every registered photo's cached buffers and
    /// zero both resident counts. Used for panic-wipe paths such as app
    /// backgrounding.
    pub fn free_all(&self) {
        let _guard = self.registry.lock();
        self.cache.clear_all();
        log::info!("memory manager freed all cached buffers");
    }
}
