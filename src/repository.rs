//! Obscura - Photo Repository
//!
//! The single façade UI-facing code talks to. Composes the content
//! store, metadata index, encryption service, image cache, memory
//! manager, and masking engine; owns none of their state directly and
//! is stateless between calls apart from the per-id lock map.
//!
//! Operations against the same id are serialized through an id-keyed
//! async lock: metadata read-modify-write and delete-vs-load races
//! cannot interleave. Different ids run fully in parallel.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cache::{ImageCache, PreloadPriority};
use crate::crypto::{EncryptionService, KeyProvider};
use crate::detect::{FaceDetector, LocationTagProvider};
use crate::error::{VaultError, VaultResult};
use crate::index::MetadataIndex;
use crate::masking::MaskingEngine;
use crate::memory::MemoryManager;
use crate::photo::{FaceRegion, MaskMode, PhotoQuery, PhotoRecord, PhotoState, SecurePhoto};
use crate::store::{self, ContentStore};

/// Re-encoding target for plaintext export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jpeg { quality: u8 },
    Png,
    /// Placeholder; exporting HEIC is not implemented and fails
    /// explicitly rather than falling back to another codec.
    Heic,
}

/// Id-keyed async locks serializing same-id operations
struct LockMap {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockMap {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.inner
                .lock()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        lock.lock_owned().await
    }
}

/// Façade over the vault's storage, caching, and masking subsystems
pub struct PhotoRepository {
    store: Arc<ContentStore>,
    index: Arc<MetadataIndex>,
    crypto: Arc<EncryptionService>,
    cache: Arc<ImageCache>,
    memory: Arc<MemoryManager>,
    masking: MaskingEngine,
    detector: Option<Arc<dyn FaceDetector>>,
    location: Option<Arc<dyn LocationTagProvider>>,
    locks: LockMap,
    thumbnail_edge: u32,
}

impl PhotoRepository {
    /// Compose a repository from explicitly owned services
    pub fn new(
        store: Arc<ContentStore>,
        index: Arc<MetadataIndex>,
        crypto: Arc<EncryptionService>,
        cache: Arc<ImageCache>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            store,
            index,
            crypto,
            cache,
            memory,
            masking: MaskingEngine::new(),
            detector: None,
            location: None,
            locks: LockMap::new(),
            thumbnail_edge: 256,
        }
    }

    /// Wire up a repository over a vault directory with default services
    pub fn open<P: AsRef<Path>>(vault_root: P) -> VaultResult<Self> {
        let root = vault_root.as_ref();
        let store = Arc::new(ContentStore::new(root));
        let index = Arc::new(MetadataIndex::new(Arc::clone(&store)));
        let crypto = Arc::new(EncryptionService::new(&KeyProvider::new(root))?);
        let cache = Arc::new(ImageCache::new());
        let memory = Arc::new(MemoryManager::new(Arc::clone(&cache)));
        Ok(Self::new(store, index, crypto, cache, memory))
    }

    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationTagProvider>) -> Self {
        self.location = Some(provider);
        self
    }

    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge.max(16);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SAVE / IMPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt and persist content with its metadata record, caching a
    /// thumbnail when the content decodes as an image.
    pub async fn save_photo(
        &self,
        plaintext: Vec<u8>,
        record: PhotoRecord,
    ) -> VaultResult<SecurePhoto> {
        let _guard = self.locks.acquire(&record.id).await;
        self.save_locked(plaintext, record)
    }

    fn save_locked(&self, plaintext: Vec<u8>, record: PhotoRecord) -> VaultResult<SecurePhoto> {
        let id = record.id.clone();

        let ciphertext = self.crypto.encrypt(&plaintext)?;
        self.store.save_blob(&id, &ciphertext)?;
        self.index.save(&record)?;

        // Non-decodable content (including empty files) is stored fine,
        // it just gets no thumbnail
        let image = image::load_from_memory(&plaintext).ok().map(Arc::new);
        let thumbnail = image.as_ref().map(|img| {
            let thumb = Arc::new(make_thumbnail(img, self.thumbnail_edge));
            self.cache.put_thumbnail(&id, Arc::clone(&thumb));
            thumb
        });

        let state = self.register_state(&id);
        if thumbnail.is_some() {
            self.memory.report_thumbnail_loaded(&id);
        }

        Ok(SecurePhoto {
            id,
            record,
            bytes: Some(plaintext),
            image,
            thumbnail,
            state,
        })
    }

    /// Import freshly captured content under a new id
    pub async fn import_from_camera(&self, plaintext: Vec<u8>) -> VaultResult<SecurePhoto> {
        self.import_new(plaintext).await
    }

    /// Import content picked from the system photo library
    pub async fn import_from_library(&self, plaintext: Vec<u8>) -> VaultResult<SecurePhoto> {
        self.import_new(plaintext).await
    }

    async fn import_new(&self, plaintext: Vec<u8>) -> VaultResult<SecurePhoto> {
        let id = store::generate_photo_id();
        let mut record = PhotoRecord::new(id, plaintext.len() as u64);

        if let Some(provider) = &self.location {
            record.location_tags = provider.current_location_tags();
        }

        self.save_photo(plaintext, record).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOAD
    // ═══════════════════════════════════════════════════════════════════════

    /// Load one photo, serving the decoded image from cache when warm
    pub async fn load_photo(&self, id: &str) -> VaultResult<SecurePhoto> {
        let _guard = self.locks.acquire(id).await;
        self.load_locked(id)
    }

    fn load_locked(&self, id: &str) -> VaultResult<SecurePhoto> {
        let record = self
            .index
            .load(id)?
            .ok_or_else(|| VaultError::PhotoNotFound(id.to_string()))?;

        // Cache first
        if let Some(image) = self.cache.get_image(id) {
            let state = self.register_state(id);
            state.touch();
            self.memory.report_image_loaded(id);
            return Ok(SecurePhoto {
                id: id.to_string(),
                record,
                bytes: None,
                image: Some(image),
                thumbnail: self.cache.get_thumbnail(id),
                state,
            });
        }

        // A record whose blob is gone is an inconsistency to surface,
        // not an absence to fabricate around
        let ciphertext = match self.store.load_blob(id) {
            Ok(bytes) => bytes,
            Err(VaultError::PhotoNotFound(_)) => {
                return Err(VaultError::FileSystem(format!(
                    "metadata record for {} has no content blob",
                    id
                )))
            }
            Err(e) => return Err(e),
        };
        let plaintext = self.crypto.decrypt(&ciphertext)?;

        let image = image::load_from_memory(&plaintext).ok().map(Arc::new);
        if let Some(img) = &image {
            self.cache.put_image(id, Arc::clone(img));
            self.memory.report_image_loaded(id);
        }

        let thumbnail = self.cache.get_thumbnail(id).or_else(|| {
            image.as_ref().map(|img| {
                let thumb = Arc::new(make_thumbnail(img, self.thumbnail_edge));
                self.cache.put_thumbnail(id, Arc::clone(&thumb));
                self.memory.report_thumbnail_loaded(id);
                thumb
            })
        });

        let state = self.register_state(id);
        state.touch();

        Ok(SecurePhoto {
            id: id.to_string(),
            record,
            bytes: Some(plaintext),
            image,
            thumbnail,
            state,
        })
    }

    /// Load the whole library. One corrupt photo never takes down the
    /// rest: item-local failures are logged and skipped, and the call
    /// itself fails only on a failed index enumeration or a vault-level
    /// crypto failure that would doom every item alike.
    pub async fn load_all_photos(&self) -> VaultResult<Vec<SecurePhoto>> {
        let records = self.index.load_all()?;
        self.load_tolerant(records).await
    }

    /// Tolerant batch load of every record matching the query
    pub async fn load_photos_matching(&self, query: &PhotoQuery) -> VaultResult<Vec<SecurePhoto>> {
        let records = self.index.find_matching(query)?;
        self.load_tolerant(records).await
    }

    async fn load_tolerant(&self, records: Vec<PhotoRecord>) -> VaultResult<Vec<SecurePhoto>> {
        let mut photos = Vec::with_capacity(records.len());
        for record in records {
            match self.load_photo(&record.id).await {
                Ok(photo) => photos.push(photo),
                Err(e) if e.is_item_local() => {
                    log::warn!("skipping photo {}: {}", record.id, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(photos)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DELETE
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete blob, record, and cached buffers. Best-effort on all
    /// three, but a failed blob delete is reported. Absent ids succeed.
    pub async fn delete_photo(&self, id: &str) -> VaultResult<()> {
        let _guard = self.locks.acquire(id).await;

        let blob_result = self.store.delete_blob(id);

        if let Err(e) = self.index.delete(id) {
            log::warn!("record delete for {} failed: {}", id, e);
        }
        self.cache.evict(id);
        self.memory.forget(id);

        blob_result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FACES & MASKING
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace the face list wholesale, preserving the creation date and
    /// refreshing the modification date.
    pub async fn update_face_detection_results(
        &self,
        id: &str,
        faces: Vec<FaceRegion>,
    ) -> VaultResult<SecurePhoto> {
        let _guard = self.locks.acquire(id).await;

        let mut record = self
            .index
            .load(id)?
            .ok_or_else(|| VaultError::PhotoNotFound(id.to_string()))?;
        record.faces = faces;
        let record = self.index.update(record)?;

        let state = self.register_state(id);
        Ok(SecurePhoto {
            id: id.to_string(),
            record,
            bytes: None,
            image: self.cache.get_image(id),
            thumbnail: self.cache.get_thumbnail(id),
            state,
        })
    }

    /// Run the injected detector over the decoded image and store the
    /// resulting boxes. Without a detector this records an empty list.
    pub async fn detect_faces(&self, id: &str) -> VaultResult<SecurePhoto> {
        let photo = self.load_photo(id).await?;
        let image = photo
            .image
            .ok_or_else(|| VaultError::ImageError(format!("{} is not a decodable image", id)))?;

        let faces: Vec<FaceRegion> = match &self.detector {
            Some(detector) => detector
                .detect(&image)
                .into_iter()
                .map(|b| FaceRegion::detected(b.x, b.y, b.width, b.height))
                .collect(),
            None => {
                log::debug!("no face detector configured, storing empty face list");
                Vec::new()
            }
        };

        self.update_face_detection_results(id, faces).await
    }

    /// Mask the selected face regions and save the result as the
    /// photo's new content. One-way: the unmasked original is gone once
    /// this returns.
    pub async fn apply_mask(&self, id: &str, modes: &[MaskMode]) -> VaultResult<SecurePhoto> {
        let _guard = self.locks.acquire(id).await;

        let record = self
            .index
            .load(id)?
            .ok_or_else(|| VaultError::PhotoNotFound(id.to_string()))?;

        let ciphertext = self.store.load_blob(id)?;
        let plaintext = self.crypto.decrypt(&ciphertext)?;
        let image = image::load_from_memory(&plaintext)
            .map_err(|e| VaultError::ImageError(format!("{}: {}", id, e)))?;

        let masked = self.masking.apply(&image, &record.faces, modes)?;
        let masked_bytes = encode_jpeg(&masked, 90)?;

        let ciphertext = self.crypto.encrypt(&masked_bytes)?;
        self.store.save_blob(id, &ciphertext)?;

        let mut record = record;
        record.file_size_bytes = masked_bytes.len() as u64;
        if let Some(mode) = modes.first().copied().filter(|m| *m != MaskMode::None) {
            record.mask_mode = mode;
        }
        let record = self.index.update(record)?;

        // Stale decoded buffers would resurrect the unmasked content
        self.cache.evict(id);
        let masked = Arc::new(masked);
        self.cache.put_image(id, Arc::clone(&masked));
        let thumb = Arc::new(make_thumbnail(&masked, self.thumbnail_edge));
        self.cache.put_thumbnail(id, Arc::clone(&thumb));

        let state = self.register_state(id);
        Ok(SecurePhoto {
            id: id.to_string(),
            record,
            bytes: Some(masked_bytes),
            image: Some(masked),
            thumbnail: Some(thumb),
            state,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Re-encode the decrypted image for export
    pub async fn export_photo(&self, id: &str, format: ExportFormat) -> VaultResult<Vec<u8>> {
        let _guard = self.locks.acquire(id).await;

        if !self.store.record_exists(id) {
            return Err(VaultError::PhotoNotFound(id.to_string()));
        }
        let ciphertext = self.store.load_blob(id)?;
        let plaintext = self.crypto.decrypt(&ciphertext)?;
        let image = image::load_from_memory(&plaintext)
            .map_err(|e| VaultError::ExportFailed(format!("content does not decode: {}", e)))?;

        match format {
            ExportFormat::Jpeg { quality } => encode_jpeg(&image, quality),
            ExportFormat::Png => {
                let mut buf = Cursor::new(Vec::new());
                image
                    .write_to(&mut buf, ImageFormat::Png)
                    .map_err(|e| VaultError::ExportFailed(e.to_string()))?;
                Ok(buf.into_inner())
            }
            ExportFormat::Heic => Err(VaultError::ExportFailed(
                "HEIC export is not implemented".into(),
            )),
        }
    }

    /// Write the decrypted content to a plaintext temp file under a
    /// non-guessable name, for handing to an external share target.
    ///
    /// This deliberately crosses the encryption boundary; share targets
    /// cannot read vault blobs. The caller is responsible for removing
    /// the file when the share sheet is done with it.
    pub async fn export_for_sharing(&self, id: &str) -> VaultResult<PathBuf> {
        let _guard = self.locks.acquire(id).await;

        if !self.store.record_exists(id) {
            return Err(VaultError::PhotoNotFound(id.to_string()));
        }
        let ciphertext = self.store.load_blob(id)?;
        let plaintext = self.crypto.decrypt(&ciphertext)?;

        let ext = image::guess_format(&plaintext)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin");
        let path = std::env::temp_dir().join(format!("{}.{}", Uuid::new_v4(), ext));
        std::fs::write(&path, &plaintext)?;

        log::info!("plaintext share copy of {} written to temp", id);
        Ok(path)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CACHE WARMING & CONTROL
    // ═══════════════════════════════════════════════════════════════════════

    /// Warm the image cache for up to `count` neighbors on each side of
    /// `current_id` in the creation-date-descending order. Fire and
    /// forget: failures are logged, never surfaced, and a superseded
    /// preload is allowed to finish wastefully.
    pub fn preload_adjacent(&self, current_id: &str, count: usize) -> tokio::task::JoinHandle<()> {
        let records = match self.index.load_all() {
            Ok(records) => records,
            Err(e) => {
                log::warn!("adjacent preload skipped, index unreadable: {}", e);
                return tokio::spawn(async {});
            }
        };

        let ids: Vec<String> = match records.iter().position(|r| r.id == current_id) {
            Some(pos) => {
                let from = pos.saturating_sub(count);
                let to = (pos + count + 1).min(records.len());
                records[from..to]
                    .iter()
                    .filter(|r| r.id != current_id)
                    .map(|r| r.id.clone())
                    .collect()
            }
            None => {
                log::debug!("adjacent preload: {} not in library", current_id);
                return tokio::spawn(async {});
            }
        };

        self.cache
            .preload_images(ids, PreloadPriority::Normal, self.image_loader())
    }

    /// Warm the thumbnail cache for the given ids at low priority
    pub fn preload_thumbnails(&self, ids: Vec<String>) -> tokio::task::JoinHandle<()> {
        let edge = self.thumbnail_edge;
        let load = self.image_loader();
        self.cache
            .preload_thumbnails(ids, PreloadPriority::Low, move |id| {
                let fut = load(id);
                async move { fut.await.map(|img| make_thumbnail(&img, edge)) }
            })
    }

    /// Decrypt-and-decode loader the cache preloaders run in the
    /// background
    fn image_loader(
        &self,
    ) -> impl Fn(String) -> std::pin::Pin<Box<dyn std::future::Future<Output = VaultResult<DynamicImage>> + Send>>
           + Send
           + Sync
           + 'static {
        let store = Arc::clone(&self.store);
        let crypto = Arc::clone(&self.crypto);
        move |id: String| {
            let store = Arc::clone(&store);
            let crypto = Arc::clone(&crypto);
            Box::pin(async move {
                let ciphertext = store.load_blob(&id)?;
                let plaintext = crypto.decrypt(&ciphertext)?;
                image::load_from_memory(&plaintext)
                    .map_err(|e| VaultError::ImageError(format!("{}: {}", id, e)))
            })
        }
    }

    /// Presentation-layer visibility report
    pub fn set_visible(&self, id: &str, visible: bool) {
        self.memory.set_visible(id, visible);
    }

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    /// Panic-wipe: drop every cached decoded buffer immediately
    pub fn free_memory(&self) {
        self.memory.free_all();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    fn register_state(&self, id: &str) -> Arc<PhotoState> {
        let state = self
            .memory
            .state_of(id)
            .unwrap_or_else(|| Arc::new(PhotoState::new()));
        self.memory.register(id, Arc::clone(&state));
        state
    }
}

/// Center-crop to square, then resize to the configured edge
fn make_thumbnail(img: &DynamicImage, edge: u32) -> DynamicImage {
    let (width, height) = img.dimensions();

    let (crop_x, crop_y, crop_size) = if width > height {
        ((width - height) / 2, 0, height)
    } else {
        (0, (height - width) / 2, width)
    };

    img.crop_imm(crop_x, crop_y, crop_size.max(1), crop_size.max(1))
        .resize_exact(edge, edge, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> VaultResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| VaultError::ExportFailed(e.to_string()))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, LocationTagProvider};
    use image::{Rgba, RgbaImage};
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};

    fn repo(dir: &TempDir) -> PhotoRepository {
        PhotoRepository::open(dir.path().join("vault")).unwrap()
    }

    /// PNG bytes of a gradient image, offset from pure black
    fn png_bytes(edge: u32) -> Vec<u8> {
        let mut img = RgbaImage::new(edge, edge);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = (40 + x * 180 / edge.max(1)) as u8;
            *pixel = Rgba([v, v, v, 255]);
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_import_load_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let plaintext = png_bytes(64);
        let saved = repo.import_from_camera(plaintext.clone()).await.unwrap();
        assert_eq!(saved.record.file_size_bytes, plaintext.len() as u64);
        assert!(saved.thumbnail.is_some());

        // Fresh repository over the same directory: nothing cached,
        // everything comes off disk through decryption
        let repo2 = PhotoRepository::open(dir.path().join("vault")).unwrap();
        let loaded = repo2.load_photo(&saved.id).await.unwrap();
        assert_eq!(loaded.bytes.as_deref(), Some(plaintext.as_slice()));
        assert!(loaded.image.is_some());
    }

    #[tokio::test]
    async fn test_blob_on_disk_is_not_plaintext() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let plaintext = png_bytes(16);
        let saved = repo.import_from_library(plaintext.clone()).await.unwrap();

        let blob = std::fs::read(
            dir.path()
                .join("vault")
                .join(format!("{}.enc", saved.id)),
        )
        .unwrap();
        assert_ne!(blob, plaintext);
        // PNG magic must not appear at the head of the envelope's body
        assert_ne!(&blob[..4.min(blob.len())], &plaintext[..4]);
    }

    #[tokio::test]
    async fn test_zero_byte_photo_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(Vec::new()).await.unwrap();
        assert_eq!(saved.record.file_size_bytes, 0);
        assert!(saved.image.is_none());
        assert!(saved.thumbnail.is_none());

        let loaded = repo.load_photo(&saved.id).await.unwrap();
        assert_eq!(loaded.bytes.as_deref(), Some(&[][..]));
        assert_eq!(loaded.record.file_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_load_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let result = repo(&dir).load_photo("nope").await;
        assert!(matches!(result, Err(VaultError::PhotoNotFound(_))));
    }

    #[tokio::test]
    async fn test_record_without_blob_is_an_inconsistency() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        repo.clear_cache();
        std::fs::remove_file(
            dir.path()
                .join("vault")
                .join(format!("{}.enc", saved.id)),
        )
        .unwrap();

        let result = repo.load_photo(&saved.id).await;
        assert!(matches!(result, Err(VaultError::FileSystem(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_clears_cache() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        repo.load_photo(&saved.id).await.unwrap();
        assert!(repo.cache.has_image(&saved.id));

        repo.delete_photo(&saved.id).await.unwrap();
        assert!(!repo.cache.has_image(&saved.id));
        assert!(matches!(
            repo.load_photo(&saved.id).await,
            Err(VaultError::PhotoNotFound(_))
        ));

        // Deleting an id that never existed, twice
        repo.delete_photo("ghost").await.unwrap();
        repo.delete_photo("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_blob_skipped_in_bulk_load() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let good_a = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let bad = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let good_b = repo.import_from_camera(png_bytes(16)).await.unwrap();

        repo.clear_cache();
        std::fs::write(
            dir.path().join("vault").join(format!("{}.enc", bad.id)),
            b"garbage, not an envelope",
        )
        .unwrap();

        // Single-item load surfaces the corruption
        assert!(repo.load_photo(&bad.id).await.is_err());

        // Bulk load carries on
        let all = repo.load_all_photos().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(all.len(), 2);
        assert!(ids.contains(&good_a.id.as_str()));
        assert!(ids.contains(&good_b.id.as_str()));
    }

    #[tokio::test]
    async fn test_predicate_load_filters() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let plain = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let faced = repo.import_from_camera(png_bytes(16)).await.unwrap();
        repo.update_face_detection_results(&faced.id, vec![FaceRegion::detected(1.0, 1.0, 4.0, 4.0)])
            .await
            .unwrap();

        let query = PhotoQuery {
            has_faces: Some(true),
            ..Default::default()
        };
        let hits = repo.load_photos_matching(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, faced.id);
        assert_ne!(hits[0].id, plain.id);
    }

    #[tokio::test]
    async fn test_face_update_preserves_creation_date() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let created = saved.record.created_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let updated = repo
            .update_face_detection_results(&saved.id, vec![FaceRegion::user_drawn(2.0, 2.0, 8.0, 8.0)])
            .await
            .unwrap();

        assert_eq!(updated.record.created_at, created);
        assert!(updated.record.modified_at > created);
        assert_eq!(updated.record.faces.len(), 1);
        assert!(updated.record.faces[0].is_user_created);
    }

    #[tokio::test]
    async fn test_concurrent_face_updates_lose_neither_write() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(repo(&dir));

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let id = saved.id.clone();

        let faces_a = vec![FaceRegion::detected(1.0, 1.0, 4.0, 4.0)];
        let faces_b = vec![
            FaceRegion::detected(8.0, 8.0, 4.0, 4.0),
            FaceRegion::detected(2.0, 2.0, 4.0, 4.0),
        ];

        let (ra, rb) = tokio::join!(
            {
                let repo = Arc::clone(&repo);
                let id = id.clone();
                let faces = faces_a.clone();
                async move { repo.update_face_detection_results(&id, faces).await }
            },
            {
                let repo = Arc::clone(&repo);
                let id = id.clone();
                let faces = faces_b.clone();
                async move { repo.update_face_detection_results(&id, faces).await }
            }
        );
        ra.unwrap();
        rb.unwrap();

        // The per-id lock serializes the read-modify-write: the final
        // record is exactly one writer's list, never a torn mix
        let final_faces = repo.load_photo(&id).await.unwrap().record.faces;
        assert!(final_faces == faces_a || final_faces == faces_b);
    }

    #[tokio::test]
    async fn test_detect_faces_stores_detector_boxes() {
        struct StubDetector;
        impl FaceDetector for StubDetector {
            fn detect(&self, _image: &DynamicImage) -> Vec<BoundingBox> {
                vec![BoundingBox {
                    x: 4.0,
                    y: 4.0,
                    width: 8.0,
                    height: 8.0,
                }]
            }
        }

        let dir = tempdir().unwrap();
        let repo = PhotoRepository::open(dir.path().join("vault"))
            .unwrap()
            .with_detector(Arc::new(StubDetector));

        let saved = repo.import_from_camera(png_bytes(32)).await.unwrap();
        let updated = repo.detect_faces(&saved.id).await.unwrap();

        assert_eq!(updated.record.faces.len(), 1);
        assert!(!updated.record.faces[0].is_user_created);
        assert!(updated.record.faces[0].is_selected);
    }

    #[tokio::test]
    async fn test_import_attaches_location_tags() {
        struct StubLocation;
        impl LocationTagProvider for StubLocation {
            fn current_location_tags(&self) -> Option<BTreeMap<String, String>> {
                let mut tags = BTreeMap::new();
                tags.insert("city".into(), "Reykjavik".into());
                Some(tags)
            }
        }

        let dir = tempdir().unwrap();
        let repo = PhotoRepository::open(dir.path().join("vault"))
            .unwrap()
            .with_location_provider(Arc::new(StubLocation));

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        let tags = saved.record.location_tags.unwrap();
        assert_eq!(tags.get("city").map(String::as_str), Some("Reykjavik"));
    }

    #[tokio::test]
    async fn test_apply_mask_replaces_content_for_good() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(64)).await.unwrap();
        repo.update_face_detection_results(&saved.id, vec![FaceRegion::detected(8.0, 8.0, 16.0, 16.0)])
            .await
            .unwrap();

        let masked = repo
            .apply_mask(&saved.id, &[MaskMode::Blackout])
            .await
            .unwrap();
        assert_eq!(masked.record.mask_mode, MaskMode::Blackout);

        // Reload from disk: the masked pixels are what is stored now
        repo.clear_cache();
        let reloaded = repo.load_photo(&saved.id).await.unwrap();
        let img = reloaded.image.unwrap().to_rgba8();
        let p = img.get_pixel(12, 12).0;
        assert!(p[0] < 20 && p[1] < 20 && p[2] < 20, "region not blacked out: {:?}", p);
        // Outside the region the gradient survives (JPEG-lossy, roughly)
        assert!(img.get_pixel(48, 48).0[0] > 100);
    }

    #[tokio::test]
    async fn test_export_png_and_unimplemented_heic() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(32)).await.unwrap();

        let png = repo
            .export_photo(&saved.id, ExportFormat::Png)
            .await
            .unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.dimensions(), (32, 32));

        let jpeg = repo
            .export_photo(&saved.id, ExportFormat::Jpeg { quality: 80 })
            .await
            .unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);

        let heic = repo.export_photo(&saved.id, ExportFormat::Heic).await;
        assert!(matches!(heic, Err(VaultError::ExportFailed(_))));
    }

    #[tokio::test]
    async fn test_export_of_undecodable_content_fails() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo
            .import_from_camera(b"just some text".to_vec())
            .await
            .unwrap();
        let result = repo.export_photo(&saved.id, ExportFormat::Png).await;
        assert!(matches!(result, Err(VaultError::ExportFailed(_))));
    }

    #[tokio::test]
    async fn test_share_export_writes_plaintext_temp_file() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let plaintext = png_bytes(16);
        let saved = repo.import_from_camera(plaintext.clone()).await.unwrap();

        let path = repo.export_for_sharing(&saved.id).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), plaintext);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_preload_adjacent_warms_neighbors() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let mut ids = Vec::new();
        for _ in 0..5 {
            // Distinct creation timestamps keep the ordering unambiguous
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            ids.push(repo.import_from_camera(png_bytes(16)).await.unwrap().id);
        }
        repo.clear_cache();

        // Library order is newest-first; warm one neighbor each side of
        // the middle photo
        repo.preload_adjacent(&ids[2], 1).await.unwrap();

        assert!(repo.cache.has_image(&ids[1]));
        assert!(repo.cache.has_image(&ids[3]));
        assert!(!repo.cache.has_image(&ids[0]));
        assert!(!repo.cache.has_image(&ids[4]));
        assert!(!repo.cache.has_image(&ids[2]));
    }

    #[tokio::test]
    async fn test_preload_thumbnails_passthrough() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(32)).await.unwrap();
        repo.clear_cache();

        repo.preload_thumbnails(vec![saved.id.clone()])
            .await
            .unwrap();
        assert!(repo.cache.has_thumbnail(&saved.id));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_content_store() {
        let dir = tempdir().unwrap();
        let repo = repo(&dir);

        let saved = repo.import_from_camera(png_bytes(16)).await.unwrap();
        repo.load_photo(&saved.id).await.unwrap();

        // Remove the blob; the cached decode must still serve the load
        std::fs::remove_file(
            dir.path()
                .join("vault")
                .join(format!("{}.enc", saved.id)),
        )
        .unwrap();

        let photo = repo.load_photo(&saved.id).await.unwrap();
        assert!(photo.image.is_some());
        assert!(photo.bytes.is_none());
    }
}
