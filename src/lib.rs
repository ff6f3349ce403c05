//! # Obscura
//!
//! Encrypted photo vault with destructive face masking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PHOTO REPOSITORY                     │
//! │   save / load / delete / query / export / mask / warm    │
//! └───┬───────────────┬───────────────┬──────────────┬───────┘
//!     │               │               │              │
//! ┌───┴─────┐   ┌─────┴─────┐   ┌─────┴─────┐  ┌─────┴─────┐
//! │ CONTENT │   │ METADATA  │   │  IMAGE    │  │  MASKING  │
//! │ STORE   │   │ INDEX     │   │  CACHE    │  │  ENGINE   │
//! └───┬─────┘   └───────────┘   └─────┬─────┘  └───────────┘
//!     │                               │
//! ┌───┴─────────┐               ┌─────┴─────────┐
//! │ ENCRYPTION  │               │   MEMORY      │
//! │ AES-256-GCM │               │   MANAGER     │
//! └─────────────┘               └───────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Photo content encrypted at rest with AES-256-GCM
//! - One durable master seed, content key derived via HKDF
//! - Vault directory carries a backup-exclusion marker
//! - Key material zeroized when dropped
//! - Sharing a photo crosses the plaintext boundary deliberately, through
//!   a non-guessable temp file

pub mod cache;
pub mod config;
pub mod crypto;
pub mod detect;
pub mod error;
pub mod index;
pub mod masking;
pub mod memory;
pub mod photo;
pub mod repository;
pub mod store;

pub use cache::{ImageCache, PreloadPriority};
pub use config::ConfigStore;
pub use error::{VaultError, VaultResult};
pub use index::MetadataIndex;
pub use masking::MaskingEngine;
pub use memory::MemoryManager;
pub use photo::{FaceRegion, MaskMode, PhotoQuery, PhotoRecord, SecurePhoto};
pub use repository::{ExportFormat, PhotoRepository};
pub use store::ContentStore;

/// Obscura version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
