//! Directory listing for the gallery.
//!
//! Only regular files directly inside a directory are listed. The listing is ordered newest
//! first by modification time, with ties broken by path so the order is stable.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::media::kind::has_media_extension;
use crate::models::FileEntry;

/// List the media files of one directory.
pub fn list_media(dir: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = discover(dir)?;
    sort_newest_first(&mut entries);
    debug!(?dir, count = entries.len(), "Listed media directory");
    Ok(entries)
}

/// List several directories as one gallery with the same ordering.
pub fn list_media_multi(dirs: &[PathBuf]) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for dir in dirs {
        entries.extend(discover(dir)?);
    }
    sort_newest_first(&mut entries);
    debug!(dirs = dirs.len(), count = entries.len(), "Listed media directories");
    Ok(entries)
}

fn discover(dir: &Path) -> Result<Vec<FileEntry>> {
    let metadata =
        std::fs::metadata(dir).with_context(|| format!("Failed to read directory {:?}", dir))?;
    anyhow::ensure!(metadata.is_dir(), "Not a directory: {:?}", dir);

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !has_media_extension(entry.path()) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to read metadata for {:?}: {}", entry.path(), e);
                continue;
            }
        };

        entries.push(FileEntry::from_metadata(entry.into_path(), &metadata));
    }
    Ok(entries)
}

fn sort_newest_first(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        Reverse(a.mtime)
            .cmp(&Reverse(b.mtime))
            .then_with(|| a.path.cmp(&b.path))
    });
}
