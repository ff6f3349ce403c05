//! Obscura - Collaborator Interfaces
//!
//! Boundaries to external subsystems the vault consumes but does not
//! implement: the face-detection model and the location-tag source.

use std::collections::BTreeMap;

use image::DynamicImage;

/// Axis-aligned box in source-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Opaque face detector. The model behind it is out of scope; the vault
/// only consumes the boxes it produces.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Vec<BoundingBox>;
}

/// Optional location metadata, consulted only at save time
pub trait LocationTagProvider: Send + Sync {
    fn current_location_tags(&self) -> Option<BTreeMap<String, String>>;
}
