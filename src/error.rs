//! Error types shared by the media cache and its consumers.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failure of a single decode request.
///
/// A decode result is observed by every holder of the same handle, so the error is `Clone`
/// and keeps its underlying sources behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("media file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to decode {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: Arc<image::ImageError>,
    },

    #[error("animation has no frames: {0:?}")]
    NoFrames(PathBuf),

    #[error("failed to start decode worker")]
    Spawn(#[source] Arc<std::io::Error>),

    #[error("decoder panicked on {0:?}")]
    Panicked(PathBuf),
}

impl DecodeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path);
        }
        Self::Io {
            path,
            source: Arc::new(source),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Decode {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
