//! Gallery navigation over a directory listing.
//!
//! `Gallery` owns the position in the listing and drives the shared [`MediaCache`] the way the
//! viewer must:
//! - every step requests the new current image and precaches its neighbours
//! - big jumps (page, first, last, random) announce bulk navigation before moving
//! - a change of directory invalidates the cache before the new listing is shown

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::DecodeError;
use crate::media::{Animation, DecodeHandle, MediaCache, MediaKind};
use crate::models::FileEntry;
use crate::scanner;

/// Items skipped by one page step.
pub const PAGE_STEP: usize = 10;

/// Slots in the preview strip, centred on the current item.
pub const PREVIEW_SLOTS: usize = 5;

/// What the display should show for the current entry.
#[derive(Debug)]
pub enum CurrentMedia {
    Image(DecodeHandle),
    Animation(Animation),
    /// Videos are handed to an external player by path.
    Video(PathBuf),
    Empty,
}

pub struct Gallery {
    cache: Arc<MediaCache>,
    files: Vec<FileEntry>,
    index: usize,
    dirs: Vec<PathBuf>,
    precache_window: usize,
}

impl Gallery {
    pub fn new(cache: Arc<MediaCache>, precache_window: usize) -> Self {
        Self {
            cache,
            files: Vec::new(),
            index: 0,
            dirs: Vec::new(),
            precache_window,
        }
    }

    /// Open a file or a directory.
    ///
    /// A file opens its parent directory positioned on that file (or on the newest item if
    /// the file is not listed, e.g. because it is not media).
    pub fn open(&mut self, target: &Path) -> Result<()> {
        let metadata = std::fs::metadata(target)
            .with_context(|| format!("Failed to open {:?}", target))?;

        if metadata.is_dir() {
            return self.navigate_dir(target);
        }

        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.load(vec![dir])?;
        if let Some(pos) = self.files.iter().position(|f| same_file(&f.path, target)) {
            self.index = pos;
        }
        self.show_current();
        Ok(())
    }

    /// Switch to another directory, dropping everything cached for the old one.
    pub fn navigate_dir(&mut self, dir: &Path) -> Result<()> {
        self.open_dirs(&[dir.to_path_buf()])
    }

    /// Show several directories as one listing.
    pub fn open_dirs(&mut self, dirs: &[PathBuf]) -> Result<()> {
        self.load(dirs.to_vec())?;
        self.show_current();
        Ok(())
    }

    /// Re-list the current directories, keeping the position when the file is still there.
    pub fn reload(&mut self) -> Result<()> {
        let current = self.current().map(|f| f.path.clone());
        self.load(self.dirs.clone())?;
        if let Some(pos) = current.and_then(|c| self.files.iter().position(|f| f.path == c)) {
            self.index = pos;
        }
        self.show_current();
        Ok(())
    }

    fn load(&mut self, dirs: Vec<PathBuf>) -> Result<()> {
        // Cache keys are absolute, so `a.png` and `/abs/a.png` share one entry.
        let dirs = dirs
            .iter()
            .map(|dir| {
                dir.canonicalize()
                    .with_context(|| format!("Failed to resolve directory {:?}", dir))
            })
            .collect::<Result<Vec<_>>>()?;
        let files = match dirs.as_slice() {
            [dir] => scanner::list_media(dir)?,
            _ => scanner::list_media_multi(&dirs)?,
        };
        self.cache.invalidate_all();
        info!(dirs = ?dirs, count = files.len(), "Opened gallery");
        self.files = files;
        self.dirs = dirs;
        self.index = 0;
        Ok(())
    }

    /// Replace the listing without touching the filesystem.
    pub fn set_files(&mut self, files: Vec<FileEntry>) {
        self.cache.invalidate_all();
        self.files = files;
        self.index = 0;
        self.show_current();
    }

    pub fn next(&mut self, times: usize) {
        if self.files.is_empty() {
            return;
        }
        self.index = self.index.saturating_add(times).min(self.files.len() - 1);
        self.show_current();
    }

    pub fn prev(&mut self, times: usize) {
        if self.files.is_empty() {
            return;
        }
        self.index = self.index.saturating_sub(times);
        self.show_current();
    }

    pub fn page_forward(&mut self) {
        self.cache.notify_bulk_navigation();
        self.next(PAGE_STEP);
    }

    pub fn page_back(&mut self) {
        self.cache.notify_bulk_navigation();
        self.prev(PAGE_STEP);
    }

    pub fn first(&mut self) {
        self.jump_to(0);
    }

    pub fn last(&mut self) {
        self.jump_to(self.files.len().saturating_sub(1));
    }

    pub fn random(&mut self) {
        if self.files.is_empty() {
            return;
        }
        self.jump_to(random_index(self.files.len()));
    }

    fn jump_to(&mut self, index: usize) {
        if self.files.is_empty() {
            return;
        }
        self.cache.notify_bulk_navigation();
        self.index = index.min(self.files.len() - 1);
        debug!(index = self.index, "Jumped");
        self.show_current();
    }

    /// Drop the current entry from the listing after its file was deleted or moved away.
    pub fn remove_current(&mut self) -> Option<FileEntry> {
        if self.files.is_empty() {
            return None;
        }
        let removed = self.files.remove(self.index);
        if self.index >= self.files.len() {
            self.index = self.files.len().saturating_sub(1);
        }
        self.show_current();
        Some(removed)
    }

    pub fn current(&self) -> Option<&FileEntry> {
        self.files.get(self.index)
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    /// Resolve the current entry for display.
    ///
    /// Images come back as a handle that may still be pending. Animations are decoded on
    /// every call and play independently.
    pub fn current_media(&self) -> Result<CurrentMedia, DecodeError> {
        let Some(entry) = self.current() else {
            return Ok(CurrentMedia::Empty);
        };
        Ok(match entry.kind() {
            Some(MediaKind::Image) => CurrentMedia::Image(self.cache.request_image(&entry.path)),
            Some(MediaKind::Animation) => {
                CurrentMedia::Animation(self.cache.request_animation(&entry.path)?)
            }
            Some(MediaKind::Video) => CurrentMedia::Video(entry.path.clone()),
            None => CurrentMedia::Empty,
        })
    }

    /// Paths for the preview strip, from two before to two after the current item.
    pub fn preview_paths(&self) -> [Option<PathBuf>; PREVIEW_SLOTS] {
        let centre = (PREVIEW_SLOTS / 2) as isize;
        std::array::from_fn(|slot| {
            let index = self.index as isize + slot as isize - centre;
            usize::try_from(index)
                .ok()
                .and_then(|i| self.files.get(i))
                .map(|f| f.path.clone())
        })
    }

    /// Request the current image and warm its neighbourhood.
    fn show_current(&self) {
        let Some(entry) = self.current() else {
            return;
        };
        if matches!(entry.kind(), Some(MediaKind::Image)) {
            // Non-blocking; the handle stays registered in the cache.
            let _ = self.cache.request_image(&entry.path);
        }
        self.precache();
    }

    fn precache(&self) {
        for offset in 1..=self.precache_window {
            if let Some(next) = self.files.get(self.index + offset) {
                self.cache.prefetch(&next.path);
            }
            if let Some(prev) = self.index.checked_sub(offset) {
                self.cache.prefetch(&self.files[prev].path);
            }
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn random_index(len: usize) -> usize {
    let seed = RandomState::new().build_hasher().finish();
    (seed % len as u64) as usize
}
