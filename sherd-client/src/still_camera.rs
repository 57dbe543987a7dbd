//! Still-image camera.
//!
//! Serves a decoded image through the same `MediaDevices` / `VideoElement`
//! capabilities a live camera uses, so terminal capture goes through the
//! full acquisition chain. The single device hides its label until a
//! stream has been granted once, and it has no facing of its own unless one
//! is configured.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::RgbaImage;

use crate::camera::{
    DeviceInfo, DeviceKind, Facing, MediaDevices, MediaError, MediaStream, Strictness, StreamConstraints,
    VideoElement,
};
use crate::capture::{FrameSource, StillFrame};

pub const STILL_DEVICE_ID: &str = "still-image";

pub struct StillCamera {
    label: String,
    facing: Option<Facing>,
    granted: AtomicBool,
    opened: AtomicUsize,
}

impl StillCamera {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            facing: None,
            granted: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
        }
    }

    /// Facing reported to exact facing-mode requests.
    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = Some(facing);
        self
    }

    fn satisfies(&self, constraints: &StreamConstraints) -> bool {
        match constraints {
            StreamConstraints::AnyVideo => true,
            StreamConstraints::Device(id) => id == STILL_DEVICE_ID,
            StreamConstraints::Facing(wanted, Strictness::Exact) => self.facing == Some(*wanted),
            StreamConstraints::Facing(_, Strictness::Ideal | Strictness::Bare) => true,
        }
    }
}

#[async_trait]
impl MediaDevices for StillCamera {
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<MediaStream, MediaError> {
        if !self.satisfies(constraints) {
            return Err(MediaError::Overconstrained(format!("{:?}", constraints)));
        }

        self.granted.store(true, Ordering::SeqCst);
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream {
            id: format!("{}-{}", STILL_DEVICE_ID, n),
        })
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let label = if self.granted.load(Ordering::SeqCst) {
            self.label.clone()
        } else {
            String::new()
        };

        Ok(vec![DeviceInfo {
            device_id: STILL_DEVICE_ID.to_string(),
            kind: DeviceKind::VideoInput,
            label,
        }])
    }
}

/// Display element for a [`StillFrame`]. Shows nothing until a stream is
/// attached.
pub struct StillVideo {
    frame: StillFrame,
    stream: Mutex<Option<MediaStream>>,
}

impl StillVideo {
    pub fn new(frame: StillFrame) -> Self {
        Self {
            frame,
            stream: Mutex::new(None),
        }
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.stream.lock().ok().and_then(|s| s.clone())
    }

    fn is_live(&self) -> bool {
        self.stream().is_some()
    }
}

#[async_trait]
impl VideoElement for StillVideo {
    fn attach(&self, stream: MediaStream) {
        if let Ok(mut current) = self.stream.lock() {
            *current = Some(stream);
        }
    }

    async fn wait_for_metadata(&self) -> Result<(), MediaError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(MediaError::Other("no stream attached".to_string()))
        }
    }
}

impl FrameSource for StillVideo {
    fn native_size(&self) -> (u32, u32) {
        if self.is_live() {
            self.frame.native_size()
        } else {
            (0, 0)
        }
    }

    fn display_size(&self) -> (u32, u32) {
        self.frame.display_size()
    }

    fn draw(&self, width: u32, height: u32) -> Option<RgbaImage> {
        if !self.is_live() {
            return None;
        }
        self.frame.draw(width, height)
    }
}
