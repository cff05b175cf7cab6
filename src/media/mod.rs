//! Decoded media for the gallery view.
//!
//! This module provides:
//! - `MediaCache` - Budgeted, deduplicating cache of decoded images
//! - `DecodeHandle` - Pending-or-resolved result shared by all requesters
//! - `MediaDecoder` - Decoder seam, with `FileDecoder` as the default
//! - `Animation` - Independently playable decoded animation
//! - `kind` - Image/animation/video classification

pub mod cache;
pub mod decoder;
pub mod handle;
pub mod kind;

pub use cache::{CacheEvent, CacheStats, CachedImage, MediaCache};
pub use decoder::{Animation, AnimationFrame, DecodedImage, FileDecoder, MediaDecoder};
pub use handle::{DecodeHandle, DecodeState};
pub use kind::MediaKind;
