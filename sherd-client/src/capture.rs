//! Capture encoder: current video frame → PNG payload.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use thiserror::Error;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const CAPTURE_FILENAME: &str = "capture.png";
pub const CAPTURE_MIME: &str = "image/png";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture failed (no image data).")]
    Empty,

    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Something that can paint its current frame.
pub trait FrameSource: Send + Sync {
    /// Native stream resolution, `(0, 0)` while unknown.
    fn native_size(&self) -> (u32, u32);

    /// Rendered size of the display element.
    fn display_size(&self) -> (u32, u32);

    /// Current frame scaled to `width`×`height`, `None` if nothing is showing.
    fn draw(&self, width: u32, height: u32) -> Option<RgbaImage>;
}

/// One encoded still plus what the preview needs. Lives for one
/// capture-to-upload cycle.
#[derive(Debug, Clone)]
pub struct CapturePayload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CapturePayload {
    pub fn file_name(&self) -> &'static str {
        CAPTURE_FILENAME
    }

    pub fn mime(&self) -> &'static str {
        CAPTURE_MIME
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", CAPTURE_MIME, BASE64.encode(&self.bytes))
    }
}

/// Per axis: native size, else display size, else the default.
pub fn resolve_dimensions(native: (u32, u32), display: (u32, u32)) -> (u32, u32) {
    let pick = |n: u32, d: u32, default: u32| {
        if n > 0 {
            n
        } else if d > 0 {
            d
        } else {
            default
        }
    };
    (
        pick(native.0, display.0, DEFAULT_WIDTH),
        pick(native.1, display.1, DEFAULT_HEIGHT),
    )
}

pub fn capture(source: &dyn FrameSource) -> Result<CapturePayload, CaptureError> {
    let (width, height) = resolve_dimensions(source.native_size(), source.display_size());
    let frame = source.draw(width, height).ok_or(CaptureError::Empty)?;

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(frame).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    if bytes.is_empty() {
        return Err(CaptureError::Empty);
    }

    tracing::debug!(width, height, size = bytes.len(), "Frame captured");
    Ok(CapturePayload {
        bytes,
        width,
        height,
    })
}

/// A still image standing in for the video element.
pub struct StillFrame {
    image: DynamicImage,
    display: (u32, u32),
}

impl StillFrame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            display: (0, 0),
        }
    }

    /// Rendered size to report, e.g. when the native size should be ignored.
    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display = (width, height);
        self
    }
}

impl FrameSource for StillFrame {
    fn native_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn draw(&self, width: u32, height: u32) -> Option<RgbaImage> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return None;
        }
        let rgba = self.image.to_rgba8();
        if rgba.dimensions() == (width, height) {
            return Some(rgba);
        }
        Some(imageops::resize(&rgba, width, height, imageops::FilterType::Triangle))
    }
}
