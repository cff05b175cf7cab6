use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

const BYTES_PER_DECIMAL_MB: f64 = 1_000_000.0;

/// Summary shown by the info overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub file_name: String,
    pub size_bytes: u64,
    /// Pixel dimensions, when the media has been decoded.
    pub dimensions: Option<(u32, u32)>,
}

impl FileInfo {
    pub fn read(path: &Path, dimensions: Option<(u32, u32)>) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read metadata for {:?}", path))?;
        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_bytes: metadata.len(),
            dimensions,
        })
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_DECIMAL_MB
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Filename: {}", self.file_name)?;
        write!(f, "Size: {:.2}MB", self.size_mb())?;
        if let Some((w, h)) = self.dimensions {
            write!(f, "\nDimensions: {}x{}", w, h)?;
        }
        Ok(())
    }
}
