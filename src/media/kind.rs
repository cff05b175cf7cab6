//! Media classification by extension and, for animation-capable formats, by content.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::trace;

const APNG_ACTL: &[u8] = b"acTL";
const APNG_IDAT: &[u8] = b"IDAT";
const WEBP_ANIM: &[u8] = b"ANIM";
const WEBP_ANMF: &[u8] = b"ANMF";

/// Window size used when scanning a PNG for its animation control chunk.
const APNG_CHECK_BUFFER_SIZE: usize = 256;

/// Overlap kept between windows so a tag split across reads is still found.
const APNG_CHECK_OVERLAP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Animation,
    Video,
}

impl MediaKind {
    /// Classify a file, reading its contents when the extension alone is ambiguous.
    pub fn detect(path: &Path) -> Option<Self> {
        if is_video(path) {
            Some(Self::Video)
        } else if is_animation(path) {
            Some(Self::Animation)
        } else if is_image(path) {
            Some(Self::Image)
        } else {
            None
        }
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn has_image_extension(ext: &str) -> bool {
    matches!(ext, "png" | "jpg" | "jpeg" | "webp")
}

fn has_animation_extension(ext: &str) -> bool {
    matches!(ext, "gif" | "png" | "webp")
}

fn has_video_extension(ext: &str) -> bool {
    matches!(ext, "mkv" | "mp4" | "webm" | "mov")
}

/// Whether the path carries any extension the gallery lists.
pub fn has_media_extension(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| {
            has_image_extension(&ext) || has_animation_extension(&ext) || has_video_extension(&ext)
        })
        .unwrap_or(false)
}

/// Whether the path is a still image (animated PNG/WebP files are not).
pub fn is_image(path: &Path) -> bool {
    match lowercase_extension(path) {
        Some(ext) if has_image_extension(&ext) => !is_animation(path),
        _ => false,
    }
}

pub fn is_video(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| has_video_extension(&ext))
        .unwrap_or(false)
}

/// Whether the path is an animation. GIF always counts; PNG and WebP are sniffed.
pub fn is_animation(path: &Path) -> bool {
    let Some(ext) = lowercase_extension(path) else {
        return false;
    };
    let animated = match ext.as_str() {
        "gif" => true,
        "png" => File::open(path).map(is_png_animated).unwrap_or(false),
        "webp" => std::fs::read(path)
            .map(|data| is_webp_animated(&data))
            .unwrap_or(false),
        _ => false,
    };
    trace!(?path, animated, "Classified animation candidate");
    animated
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// An APNG declares `acTL` before its first `IDAT` chunk.
pub(crate) fn is_png_animated<R: Read>(mut reader: R) -> bool {
    let mut buf = [0u8; APNG_CHECK_BUFFER_SIZE];
    let mut carried = 0;

    loop {
        let read = match read_fill(&mut reader, &mut buf[carried..]) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let filled = carried + read;
        let window = &buf[..filled];

        let idat = find(window, APNG_IDAT);
        let head = idat.map_or(window, |pos| &window[..pos]);
        if contains(head, APNG_ACTL) {
            return true;
        }
        if idat.is_some() || read < buf.len() - carried {
            return false;
        }

        buf.copy_within(filled - APNG_CHECK_OVERLAP..filled, 0);
        carried = APNG_CHECK_OVERLAP;
    }
}

fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

pub(crate) fn is_webp_animated(data: &[u8]) -> bool {
    contains(data, WEBP_ANIM) && contains(data, WEBP_ANMF)
}
