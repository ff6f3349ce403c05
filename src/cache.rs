//! Obscura - Image Cache
//!
//! Two independently bounded in-memory stores keyed by photo id: decoded
//! full images (few entries, large byte budget) and decoded thumbnails
//! (many entries, small byte budget). Each store trims itself on insert;
//! the memory manager drives further, visibility-aware eviction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use parking_lot::Mutex;

use crate::error::VaultResult;

/// Scheduling priority for background preload work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPriority {
    High,
    Normal,
    Low,
}

/// Per-store bounds. Cost is decoded pixel bytes (w * h * 4).
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_images: usize,
    pub max_image_bytes: usize,
    pub max_thumbnails: usize,
    pub max_thumbnail_bytes: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_images: 6,
            max_image_bytes: 256 * 1024 * 1024,
            max_thumbnails: 64,
            max_thumbnail_bytes: 32 * 1024 * 1024,
        }
    }
}

struct Entry {
    image: Arc<DynamicImage>,
    cost: usize,
    last_access: Instant,
}

struct Shard {
    entries: HashMap<String, Entry>,
    total_bytes: usize,
    max_count: usize,
    max_bytes: usize,
}

impl Shard {
    fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            max_count,
            max_bytes,
        }
    }

    fn put(&mut self, id: String, image: Arc<DynamicImage>) {
        let cost = (image.width() as usize) * (image.height() as usize) * 4;
        if let Some(old) = self.entries.insert(
            id,
            Entry {
                image,
                cost,
                last_access: Instant::now(),
            },
        ) {
            self.total_bytes -= old.cost;
        }
        self.total_bytes += cost;
        self.trim();
    }

    fn get(&mut self, id: &str) -> Option<Arc<DynamicImage>> {
        let entry = self.entries.get_mut(id)?;
        entry.last_access = Instant::now();
        Some(Arc::clone(&entry.image))
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                self.total_bytes -= entry.cost;
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Drop least-recently-accessed entries until back under both bounds
    fn trim(&mut self) {
        while self.entries.len() > self.max_count || self.total_bytes > self.max_bytes {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.remove(&id);
                    log::debug!("cache trim evicted {}", id);
                }
                None => break,
            }
        }
    }

    /// Resident ids ordered least-recently-accessed first
    fn ids_by_age(&self) -> Vec<String> {
        let mut pairs: Vec<(&String, Instant)> = self
            .entries
            .iter()
            .map(|(id, e)| (id, e.last_access))
            .collect();
        pairs.sort_by_key(|(_, at)| *at);
        pairs.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn ids_idle_longer_than(&self, idle: Duration) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.last_access.elapsed() >= idle)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Bounded two-tier cache of decoded pixel buffers
pub struct ImageCache {
    images: Mutex<Shard>,
    thumbnails: Mutex<Shard>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::with_limits(CacheLimits::default())
    }

    pub fn with_limits(limits: CacheLimits) -> Self {
        Self {
            images: Mutex::new(Shard::new(limits.max_images, limits.max_image_bytes)),
            thumbnails: Mutex::new(Shard::new(
                limits.max_thumbnails,
                limits.max_thumbnail_bytes,
            )),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FULL IMAGES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_image(&self, id: &str, image: Arc<DynamicImage>) {
        self.images.lock().put(id.to_string(), image);
    }

    pub fn get_image(&self, id: &str) -> Option<Arc<DynamicImage>> {
        self.images.lock().get(id)
    }

    pub fn has_image(&self, id: &str) -> bool {
        self.images.lock().entries.contains_key(id)
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().entries.len()
    }

    /// Resident full-image ids, least-recently-accessed first
    pub fn images_by_age(&self) -> Vec<String> {
        self.images.lock().ids_by_age()
    }

    pub fn evict_image(&self, id: &str) -> bool {
        self.images.lock().remove(id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // THUMBNAILS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_thumbnail(&self, id: &str, image: Arc<DynamicImage>) {
        self.thumbnails.lock().put(id.to_string(), image);
    }

    pub fn get_thumbnail(&self, id: &str) -> Option<Arc<DynamicImage>> {
        self.thumbnails.lock().get(id)
    }

    pub fn has_thumbnail(&self, id: &str) -> bool {
        self.thumbnails.lock().entries.contains_key(id)
    }

    pub fn thumbnail_count(&self) -> usize {
        self.thumbnails.lock().entries.len()
    }

    pub fn thumbnails_by_age(&self) -> Vec<String> {
        self.thumbnails.lock().ids_by_age()
    }

    /// Thumbnails that have gone unaccessed for at least `idle`
    pub fn thumbnails_idle_longer_than(&self, idle: Duration) -> Vec<String> {
        self.thumbnails.lock().ids_idle_longer_than(idle)
    }

    pub fn evict_thumbnail(&self, id: &str) -> bool {
        self.thumbnails.lock().remove(id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHARED
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop both buffers for one photo
    pub fn evict(&self, id: &str) {
        self.images.lock().remove(id);
        self.thumbnails.lock().remove(id);
    }

    pub fn clear_all(&self) {
        self.images.lock().clear();
        self.thumbnails.lock().clear();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PRELOAD
    // ═══════════════════════════════════════════════════════════════════════

    /// Warm the full-image store in the background. Failures are logged
    /// and swallowed; the caller's current operation is never affected.
    pub fn preload_images<F, Fut>(
        self: &Arc<Self>,
        ids: Vec<String>,
        priority: PreloadPriority,
        load: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VaultResult<DynamicImage>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            for id in ids {
                pace(priority).await;
                if cache.has_image(&id) {
                    continue;
                }
                match load(id.clone()).await {
                    Ok(image) => cache.put_image(&id, Arc::new(image)),
                    Err(e) => log::warn!("image preload for {} failed: {}", id, e),
                }
            }
        })
    }

    /// Warm the thumbnail store in the background
    pub fn preload_thumbnails<F, Fut>(
        self: &Arc<Self>,
        ids: Vec<String>,
        priority: PreloadPriority,
        load: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VaultResult<DynamicImage>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            for id in ids {
                pace(priority).await;
                if cache.has_thumbnail(&id) {
                    continue;
                }
                match load(id.clone()).await {
                    Ok(image) => cache.put_thumbnail(&id, Arc::new(image)),
                    Err(e) => log::warn!("thumbnail preload for {} failed: {}", id, e),
                }
            }
        })
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokio has no task priorities; pacing between items is the lever.
async fn pace(priority: PreloadPriority) {
    match priority {
        PreloadPriority::High => {}
        PreloadPriority::Normal => tokio::task::yield_now().await,
        PreloadPriority::Low => tokio::time::sleep(Duration::from_millis(10)).await,
    }
}
