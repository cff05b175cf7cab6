//! Preview strip around the current gallery item.
//!
//! The strip shares the gallery's cache and never waits on a decode. Each `tick` polls the
//! pending slots and promotes the ones whose decode has landed; until then the slot renders
//! as a placeholder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use crate::error::DecodeError;
use crate::gallery::PREVIEW_SLOTS;
use crate::media::{DecodeHandle, DecodeState, DecodedImage, MediaCache, MediaKind};

#[derive(Debug, Clone)]
pub enum SlotState {
    /// Nothing at this position (before the first or after the last item).
    NoMedia,
    /// Animations and videos get an icon instead of a thumbnail.
    NotImage(MediaKind),
    Pending(DecodeHandle),
    Ready(Arc<DecodedImage>),
    Failed(DecodeError),
}

#[derive(Debug, Clone)]
pub struct PreviewSlot {
    path: Option<PathBuf>,
    state: SlotState,
}

impl PreviewSlot {
    fn empty() -> Self {
        Self {
            path: None,
            state: SlotState::NoMedia,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::Pending(_))
    }
}

pub struct PreviewStrip {
    cache: Arc<MediaCache>,
    slots: [PreviewSlot; PREVIEW_SLOTS],
}

impl PreviewStrip {
    pub fn new(cache: Arc<MediaCache>) -> Self {
        Self {
            cache,
            slots: std::array::from_fn(|_| PreviewSlot::empty()),
        }
    }

    /// Point the slots at new paths. Images are requested from the cache without waiting.
    pub fn load(&mut self, paths: [Option<PathBuf>; PREVIEW_SLOTS]) {
        for (slot, path) in self.slots.iter_mut().zip(paths) {
            let state = match &path {
                None => SlotState::NoMedia,
                Some(path) => match MediaKind::detect(path) {
                    Some(MediaKind::Image) => SlotState::Pending(self.cache.request_image(path)),
                    Some(kind) => SlotState::NotImage(kind),
                    None => SlotState::NoMedia,
                },
            };
            *slot = PreviewSlot { path, state };
        }
        // Entries already cached come back ready; show them on this frame.
        self.tick();
    }

    /// Promote slots whose decode finished. Returns true when any slot changed.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        for slot in &mut self.slots {
            let SlotState::Pending(handle) = &slot.state else {
                continue;
            };
            let next = match handle.poll() {
                DecodeState::Pending => continue,
                DecodeState::Ready(image) => SlotState::Ready(image),
                DecodeState::Failed(error) => SlotState::Failed(error),
            };
            trace!(path = ?slot.path, "Preview slot resolved");
            slot.state = next;
            changed = true;
        }
        changed
    }

    pub fn slots(&self) -> &[PreviewSlot; PREVIEW_SLOTS] {
        &self.slots
    }

    /// Whether no slot is waiting on a decode.
    pub fn is_settled(&self) -> bool {
        !self.slots.iter().any(PreviewSlot::is_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaDecoder;
    use flume::{Receiver, Sender};
    use image::RgbaImage;

    /// Holds every decode until the test releases it.
    struct GatedDecoder {
        gate: Receiver<()>,
    }

    impl MediaDecoder for GatedDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
            let _ = self.gate.recv();
            if path.to_string_lossy().contains("broken") {
                return Err(DecodeError::NoFrames(path.to_path_buf()));
            }
            Ok(DecodedImage::new(RgbaImage::new(3, 3)))
        }
    }

    fn gated_cache() -> (Arc<MediaCache>, Sender<()>) {
        let (tx, rx) = flume::unbounded();
        (Arc::new(MediaCache::with_decoder(16, GatedDecoder { gate: rx })), tx)
    }

    fn paths() -> [Option<PathBuf>; PREVIEW_SLOTS] {
        [
            None,
            Some("/p/a.jpg".into()),
            Some("/p/broken.jpg".into()),
            Some("/p/clip.webm".into()),
            Some("/p/notes.txt".into()),
        ]
    }

    #[test]
    fn test_tick_never_blocks_on_pending_decodes() {
        let (cache, gate) = gated_cache();
        let mut strip = PreviewStrip::new(Arc::clone(&cache));
        strip.load(paths());

        assert!(!strip.tick());
        assert!(!strip.is_settled());
        assert!(matches!(strip.slots()[0].state(), SlotState::NoMedia));
        assert!(strip.slots()[1].is_pending());
        assert!(strip.slots()[2].is_pending());
        assert!(matches!(
            strip.slots()[3].state(),
            SlotState::NotImage(MediaKind::Video)
        ));
        assert!(matches!(strip.slots()[4].state(), SlotState::NoMedia));

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        cache.wait_idle();

        assert!(strip.tick());
        assert!(strip.is_settled());
        assert!(matches!(strip.slots()[1].state(), SlotState::Ready(img) if img.width() == 3));
        assert!(matches!(strip.slots()[2].state(), SlotState::Failed(_)));
        assert!(!strip.tick());
    }

    #[test]
    fn test_cached_entries_are_ready_on_load() {
        let (cache, gate) = gated_cache();
        gate.send(()).unwrap();
        cache.request_image("/p/a.jpg").wait().unwrap();

        let mut strip = PreviewStrip::new(Arc::clone(&cache));
        strip.load([None, None, Some("/p/a.jpg".into()), None, None]);

        assert!(strip.is_settled());
        assert_eq!(strip.slots()[2].path(), Some(Path::new("/p/a.jpg")));
        assert!(matches!(strip.slots()[2].state(), SlotState::Ready(_)));
    }

    #[test]
    fn test_reload_replaces_slots() {
        let (cache, gate) = gated_cache();
        let mut strip = PreviewStrip::new(Arc::clone(&cache));
        strip.load(paths());
        strip.load(std::array::from_fn(|_| None));

        assert!(strip.is_settled());
        assert!(strip.slots().iter().all(|s| s.path().is_none()));

        drop(strip);
        gate.send(()).unwrap();
        gate.send(()).unwrap();
    }
}
