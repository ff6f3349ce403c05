//! Obscura - Masking Engine
//!
//! Destructive pixel transforms over selected face regions. Works on a
//! full-resolution copy so successive regions layer, and the output
//! always keeps the input's pixel dimensions.
//!
//! When several modes are supplied only the first is applied; this is
//! the documented policy, not an accident.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::error::VaultResult;
use crate::photo::{FaceRegion, MaskMode};

/// Fill color for blackout
const BLACKOUT: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Region rectangle coerced into image bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClampedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Applies one mask mode to the selected regions of an image
pub struct MaskingEngine {
    /// Target cell count along the larger dimension when pixelating
    pixelate_blocks: u32,
    /// Inject random salt into the pixelation grid
    salt_noise: bool,
    blur_sigma: f32,
    blur_rounds: u32,
}

impl Default for MaskingEngine {
    fn default() -> Self {
        Self {
            pixelate_blocks: 8,
            salt_noise: true,
            blur_sigma: 8.0,
            blur_rounds: 3,
        }
    }
}

impl MaskingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with deterministic pixelation (no salt); used where
    /// reproducible output matters more than extra scrambling.
    pub fn without_salt() -> Self {
        Self {
            salt_noise: false,
            ..Self::default()
        }
    }

    /// Mask every selected region with the first supplied mode.
    ///
    /// An empty selection or an empty/`None` mode list is the identity
    /// operation: the image comes back unchanged and the call succeeds.
    pub fn apply(
        &self,
        image: &DynamicImage,
        faces: &[FaceRegion],
        modes: &[MaskMode],
    ) -> VaultResult<DynamicImage> {
        let mode = match modes.first().copied() {
            Some(MaskMode::None) | None => return Ok(image.clone()),
            Some(mode) => mode,
        };

        let selected: Vec<&FaceRegion> = faces.iter().filter(|f| f.is_selected).collect();
        if selected.is_empty() {
            return Ok(image.clone());
        }

        let mut canvas = image.to_rgba8();
        for region in selected {
            let rect = clamp_region(region, canvas.width(), canvas.height());
            match mode {
                MaskMode::Blackout => self.blackout(&mut canvas, rect),
                MaskMode::Pixelate => self.pixelate(&mut canvas, rect),
                MaskMode::Blur => self.blur(&mut canvas, rect),
                MaskMode::Noise => self.noise(&mut canvas, rect),
                MaskMode::None => unreachable!("identity handled above"),
            }
        }

        Ok(DynamicImage::ImageRgba8(canvas))
    }

    /// Solid opaque fill
    fn blackout(&self, canvas: &mut RgbaImage, rect: ClampedRect) {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                canvas.put_pixel(x, y, BLACKOUT);
            }
        }
    }

    /// Downscale to a coarse grid, optionally salt it, then nearest-
    /// neighbor upscale so the blocks stay hard-edged.
    fn pixelate(&self, canvas: &mut RgbaImage, rect: ClampedRect) {
        let patch = imageops::crop_imm(canvas, rect.x, rect.y, rect.width, rect.height).to_image();

        let larger = rect.width.max(rect.height);
        let blocks = self.pixelate_blocks.min(larger).max(1);
        let small_w = ((rect.width * blocks + larger / 2) / larger).max(1);
        let small_h = ((rect.height * blocks + larger / 2) / larger).max(1);

        let mut small = imageops::resize(&patch, small_w, small_h, FilterType::Triangle);

        if self.salt_noise {
            let mut rng = rand::thread_rng();
            for pixel in small.pixels_mut() {
                if rng.gen_bool(0.15) {
                    let v: u8 = rng.gen();
                    *pixel = Rgba([v, v, v, 255]);
                }
            }
        }

        let blocky = imageops::resize(&small, rect.width, rect.height, FilterType::Nearest);
        imageops::replace(canvas, &blocky, rect.x as i64, rect.y as i64);
    }

    /// Repeated Gaussian blur, each round fed the previous output
    fn blur(&self, canvas: &mut RgbaImage, rect: ClampedRect) {
        let mut patch =
            imageops::crop_imm(canvas, rect.x, rect.y, rect.width, rect.height).to_image();
        for _ in 0..self.blur_rounds {
            patch = imageops::blur(&patch, self.blur_sigma);
        }
        imageops::replace(canvas, &patch, rect.x as i64, rect.y as i64);
    }

    /// Overwrite every pixel with cryptographically random color values
    fn noise(&self, canvas: &mut RgbaImage, rect: ClampedRect) {
        let mut bytes = vec![0u8; (rect.width * rect.height * 3) as usize];
        OsRng.fill_bytes(&mut bytes);

        let mut chunks = bytes.chunks_exact(3);
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                let c = chunks.next().expect("noise buffer sized to region");
                canvas.put_pixel(x, y, Rgba([c[0], c[1], c[2], 255]));
            }
        }
    }
}

/// Coerce a face rectangle into image bounds.
///
/// A rectangle entirely outside the image collapses to a 1x1 region at
/// the nearest edge; otherwise each edge clamps into the image and the
/// size is forced to at least one pixel.
fn clamp_region(region: &FaceRegion, img_w: u32, img_h: u32) -> ClampedRect {
    let left = region.x;
    let top = region.y;
    let right = region.x + region.width;
    let bottom = region.y + region.height;

    let (max_x, max_y) = (img_w as f32, img_h as f32);

    if right <= 0.0 || left >= max_x || bottom <= 0.0 || top >= max_y {
        let x = left.clamp(0.0, max_x - 1.0) as u32;
        let y = top.clamp(0.0, max_y - 1.0) as u32;
        return ClampedRect {
            x,
            y,
            width: 1,
            height: 1,
        };
    }

    let x0 = left.clamp(0.0, max_x) as u32;
    let y0 = top.clamp(0.0, max_y) as u32;
    let x1 = (right.clamp(0.0, max_x) as u32).max(x0 + 1).min(img_w);
    let y1 = (bottom.clamp(0.0, max_y) as u32).max(y0 + 1).min(img_h);

    // A degenerate sliver on the far edge still gets one pixel
    let x0 = x0.min(img_w - 1);
    let y0 = y0.min(img_h - 1);

    ClampedRect {
        x: x0,
        y: y0,
        width: (x1 - x0).max(1),
        height: (y1 - y0).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    /// Horizontal gradient, offset from pure black so a blackout fill is
    /// always observable
    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbaImage::new(width, height);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = (40 + x * 180 / width.max(1)) as u8;
            *pixel = Rgba([v, v, v, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    fn selected(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion::detected(x, y, w, h)
    }

    #[test]
    fn test_empty_selection_is_identity() {
        let engine = MaskingEngine::new();
        let img = gradient(64, 48);

        let out = engine.apply(&img, &[], &[MaskMode::Blackout]).unwrap();
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(out.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn test_empty_mode_list_is_identity() {
        let engine = MaskingEngine::new();
        let img = gradient(32, 32);
        let faces = [selected(4.0, 4.0, 8.0, 8.0)];

        let out = engine.apply(&img, &faces, &[]).unwrap();
        assert_eq!(out.to_rgba8(), img.to_rgba8());

        let out = engine.apply(&img, &faces, &[MaskMode::None]).unwrap();
        assert_eq!(out.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn test_unselected_regions_are_untouched() {
        let engine = MaskingEngine::new();
        let img = gradient(32, 32);
        let mut region = selected(4.0, 4.0, 8.0, 8.0);
        region.is_selected = false;

        let out = engine.apply(&img, &[region], &[MaskMode::Noise]).unwrap();
        assert_eq!(out.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn test_blackout_fills_region_solid() {
        let engine = MaskingEngine::new();
        let img = gradient(64, 64);

        let out = engine
            .apply(&img, &[selected(8.0, 8.0, 16.0, 16.0)], &[MaskMode::Blackout])
            .unwrap()
            .to_rgba8();

        for y in 8..24 {
            for x in 8..24 {
                assert_eq!(*out.get_pixel(x, y), BLACKOUT);
            }
        }
        // Pixels outside the region keep the gradient
        assert_ne!(*out.get_pixel(40, 40), BLACKOUT);
    }

    #[test]
    fn test_first_mode_wins() {
        let engine = MaskingEngine::new();
        let img = gradient(64, 64);

        let out = engine
            .apply(
                &img,
                &[selected(0.0, 0.0, 16.0, 16.0)],
                &[MaskMode::Blackout, MaskMode::Noise],
            )
            .unwrap()
            .to_rgba8();

        // Blackout, not noise, was applied
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(*out.get_pixel(x, y), BLACKOUT);
            }
        }
    }

    #[test]
    fn test_region_outside_collapses_to_single_edge_pixel() {
        let engine = MaskingEngine::new();
        let img = gradient(32, 32);

        let out = engine
            .apply(&img, &[selected(-100.0, -100.0, 10.0, 10.0)], &[MaskMode::Blackout])
            .unwrap()
            .to_rgba8();

        let original = img.to_rgba8();
        let changed: Vec<(u32, u32)> = out
            .enumerate_pixels()
            .filter(|(x, y, p)| original.get_pixel(*x, *y) != *p)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(changed, vec![(0, 0)]);
    }

    #[test]
    fn test_overhanging_region_is_clamped() {
        let engine = MaskingEngine::new();
        let img = gradient(32, 32);

        // Extends past the right and bottom edges
        let out = engine
            .apply(&img, &[selected(24.0, 24.0, 100.0, 100.0)], &[MaskMode::Blackout])
            .unwrap();

        assert_eq!(out.dimensions(), (32, 32));
        let out = out.to_rgba8();
        assert_eq!(*out.get_pixel(31, 31), BLACKOUT);
        assert_ne!(*out.get_pixel(10, 10), BLACKOUT);
    }

    #[test]
    fn test_pixelate_reduces_color_count() {
        let engine = MaskingEngine::without_salt();
        let img = gradient(64, 64);

        let out = engine
            .apply(&img, &[selected(0.0, 0.0, 64.0, 64.0)], &[MaskMode::Pixelate])
            .unwrap()
            .to_rgba8();

        let mut colors: Vec<[u8; 4]> = out.pixels().map(|p| p.0).collect();
        colors.sort();
        colors.dedup();

        // An 8x8 grid with identical rows holds at most 8 values; the
        // original gradient had ~45
        assert!(colors.len() <= 12, "got {} distinct colors", colors.len());
        assert_ne!(out, img.to_rgba8());
    }

    #[test]
    fn test_noise_destroys_region_content() {
        let engine = MaskingEngine::new();
        let img = gradient(64, 64);

        let out = engine
            .apply(&img, &[selected(0.0, 0.0, 32.0, 32.0)], &[MaskMode::Noise])
            .unwrap()
            .to_rgba8();

        let original = img.to_rgba8();
        let changed = out
            .enumerate_pixels()
            .filter(|(x, y, p)| original.get_pixel(*x, *y) != *p)
            .count();

        // Essentially every pixel of the 32x32 region should differ
        assert!(changed > 900, "only {} pixels changed", changed);

        // Outside the region nothing moved
        assert_eq!(out.get_pixel(50, 50), original.get_pixel(50, 50));
    }

    #[test]
    fn test_blur_smooths_but_keeps_dimensions() {
        let engine = MaskingEngine::new();

        // Hard vertical edge: left half black, right half white
        let mut img = RgbaImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = if x < 32 { 0 } else { 255 };
            *pixel = Rgba([v, v, v, 255]);
        }
        let img = DynamicImage::ImageRgba8(img);

        let out = engine
            .apply(&img, &[selected(16.0, 16.0, 32.0, 32.0)], &[MaskMode::Blur])
            .unwrap();
        assert_eq!(out.dimensions(), (64, 64));

        // The edge inside the blurred region is no longer hard
        let p = out.to_rgba8().get_pixel(32, 32).0;
        assert!(p[0] > 10 && p[0] < 245, "edge pixel still hard: {:?}", p);
    }

    #[test]
    fn test_regions_layer_on_one_copy() {
        let engine = MaskingEngine::new();
        let img = gradient(64, 64);

        let out = engine
            .apply(
                &img,
                &[selected(0.0, 0.0, 8.0, 8.0), selected(32.0, 32.0, 8.0, 8.0)],
                &[MaskMode::Blackout],
            )
            .unwrap()
            .to_rgba8();

        assert_eq!(*out.get_pixel(4, 4), BLACKOUT);
        assert_eq!(*out.get_pixel(36, 36), BLACKOUT);
    }
}
