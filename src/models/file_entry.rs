use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::media::MediaKind;

/// One file in the gallery listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: i64,
    /// File size in bytes.
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, mtime: i64, size: u64) -> Self {
        Self { path, mtime, size }
    }

    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::new(path, mtime, metadata.len())
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Classify the file. Reads content for PNG/WebP animation detection.
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::detect(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        let entry = FileEntry::new("/photos/cat.jpg".into(), 0, 0);
        assert_eq!(entry.file_name(), "cat.jpg");
    }

    #[test]
    fn test_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"12345").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();

        let entry = FileEntry::from_metadata(path.clone(), &metadata);
        assert_eq!(entry.size, 5);
        assert!(entry.mtime > 0);
        assert_eq!(entry.path(), path.as_path());
    }
}
