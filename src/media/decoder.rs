use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat, RgbaImage};
use tracing::{debug, trace};

use crate::error::DecodeError;

/// Bytes per pixel of the decoded RGBA8 buffers.
const BYTES_PER_PIXEL: usize = 4;

/// Frames that declare no delay are shown for this long instead of spinning.
const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

/// A fully decoded still image, immutable once produced.
#[derive(Debug)]
pub struct DecodedImage {
    pixels: RgbaImage,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Bytes held by the pixel buffer; what the cache budget counts.
    pub fn memory_size(&self) -> usize {
        (self.width() as usize) * (self.height() as usize) * BYTES_PER_PIXEL
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Turns a file path into pixels. The cache calls this from its background workers.
pub trait MediaDecoder: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl MediaDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
        let image = open_image(path)?;
        trace!(?path, width = image.width(), height = image.height(), "Decoded image");
        Ok(DecodedImage::new(image.into_rgba8()))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, DecodeError> {
    std::fs::read(path).map_err(|e| DecodeError::io(path, e))
}

/// Decode a still image. GIFs yield their first frame.
pub fn open_image(path: &Path) -> Result<DynamicImage, DecodeError> {
    let bytes = read_file(path)?;
    let format = image::guess_format(&bytes).ok();

    if format == Some(ImageFormat::Gif) {
        let decoder =
            GifDecoder::new(Cursor::new(bytes)).map_err(|e| DecodeError::decode(path, e))?;
        let frame = decoder
            .into_frames()
            .next()
            .ok_or_else(|| DecodeError::NoFrames(path.to_path_buf()))?
            .map_err(|e| DecodeError::decode(path, e))?;
        return Ok(DynamicImage::ImageRgba8(frame.into_buffer()));
    }

    match format {
        Some(fmt) => image::load_from_memory_with_format(&bytes, fmt),
        None => image::load_from_memory(&bytes),
    }
    .map_err(|e| DecodeError::decode(path, e))
}

#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub image: RgbaImage,
    pub delay: Duration,
}

/// A decoded animation with its own playback cursor.
///
/// Every call to [`Animation::open`] decodes the file again, so two animations for the same
/// path play independently.
#[derive(Debug)]
pub struct Animation {
    path: PathBuf,
    frames: Vec<AnimationFrame>,
    current: usize,
    elapsed: Duration,
    playing: bool,
}

impl Animation {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let bytes = read_file(path)?;
        let frames = decode_frames(path, bytes)?;
        debug!(?path, frames = frames.len(), "Opened animation");
        Ok(Self::from_frames(path.to_path_buf(), frames))
    }

    pub(crate) fn from_frames(path: PathBuf, frames: Vec<AnimationFrame>) -> Self {
        Self {
            path,
            frames,
            current: 0,
            elapsed: Duration::ZERO,
            playing: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_frame(&self) -> &AnimationFrame {
        &self.frames[self.current]
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frames[0].image.dimensions()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn rewind(&mut self) {
        self.current = 0;
        self.elapsed = Duration::ZERO;
    }

    /// Move the playback clock forward, looping at the end.
    /// Returns true when the visible frame changed.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        if !self.playing || self.frames.len() < 2 {
            return false;
        }
        let cycle: Duration = self.frames.iter().map(|f| f.delay).sum();
        if cycle.is_zero() {
            return false;
        }

        // Whole loops leave the cursor where it was.
        let remainder = elapsed.as_nanos() % cycle.as_nanos();
        self.elapsed += Duration::from_nanos(remainder as u64);
        let start = self.current;
        loop {
            let delay = self.frames[self.current].delay;
            if self.elapsed < delay {
                break;
            }
            self.elapsed -= delay;
            self.current = (self.current + 1) % self.frames.len();
        }
        self.current != start
    }
}

fn into_animation_frames(frames: Vec<Frame>) -> Vec<AnimationFrame> {
    frames
        .into_iter()
        .map(|frame| {
            let delay = Duration::from(frame.delay()).max(MIN_FRAME_DELAY);
            AnimationFrame {
                image: frame.into_buffer(),
                delay,
            }
        })
        .collect()
}

fn decode_frames(path: &Path, bytes: Vec<u8>) -> Result<Vec<AnimationFrame>, DecodeError> {
    let format = image::guess_format(&bytes).ok();
    let animated = match format {
        Some(ImageFormat::Gif) => {
            let decoder = GifDecoder::new(Cursor::new(&bytes))
                .map_err(|e| DecodeError::decode(path, e))?;
            Some(decoder.into_frames().collect_frames())
        }
        Some(ImageFormat::Png) => PngDecoder::new(Cursor::new(&bytes))
            .and_then(|decoder| decoder.apng())
            .map(|apng| apng.into_frames().collect_frames())
            .ok(),
        Some(ImageFormat::WebP) => WebPDecoder::new(Cursor::new(&bytes))
            .map(|webp| webp.into_frames().collect_frames())
            .ok(),
        _ => None,
    };

    match animated {
        Some(Ok(frames)) if !frames.is_empty() => return Ok(into_animation_frames(frames)),
        Some(Ok(_)) if format == Some(ImageFormat::Gif) => {
            return Err(DecodeError::NoFrames(path.to_path_buf()))
        }
        Some(Err(e)) if format == Some(ImageFormat::Gif) => {
            return Err(DecodeError::decode(path, e))
        }
        _ => {}
    }

    // Not animated after all: present the still image as a single frame.
    let still = match format {
        Some(fmt) => image::load_from_memory_with_format(&bytes, fmt),
        None => image::load_from_memory(&bytes),
    }
    .map_err(|e| DecodeError::decode(path, e))?;

    Ok(vec![AnimationFrame {
        image: still.into_rgba8(),
        delay: MIN_FRAME_DELAY,
    }])
}
