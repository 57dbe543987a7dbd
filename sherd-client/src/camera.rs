//! Camera acquisition
//!
//! Opens a live stream through a layered fallback chain against a
//! `MediaDevices` capability:
//!
//! 1. a throwaway permission request so device labels become visible
//! 2. a device whose label matches the wanted facing
//! 3. facing-mode constraints: exact, then ideal, then a bare preference
//! 4. an unconstrained request
//!
//! Each strategy either yields constraints to try or skips. The first stream
//! that opens and reports metadata wins. Only exhausting the chain is fatal.

use async_trait::async_trait;
use thiserror::Error;

use crate::ui::CaptureUi;

pub const TERMINAL_ERROR: &str =
    "Could not access a camera on this device. Check permissions and that the browser supports camera capture.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Front / selfie camera
    User,
    /// Back / rear camera
    Environment,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::User => "user",
            Facing::Environment => "environment",
        }
    }

    /// Lowercase substrings that identify a device label for this facing.
    pub fn label_keywords(&self) -> &'static [&'static str] {
        match self {
            Facing::User => &["front", "face", "user", "selfie"],
            Facing::Environment => &["back", "rear", "environment"],
        }
    }

    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.label_keywords().iter().any(|k| label.contains(k))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Exact,
    Ideal,
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamConstraints {
    /// `{ video: true }`
    AnyVideo,
    /// `{ video: { deviceId: { exact } } }`
    Device(String),
    /// `{ video: { facingMode: ... } }`
    Facing(Facing, Strictness),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    /// Empty until permission has been granted.
    pub label: String,
}

/// Handle to an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied")]
    NotAllowed,
    #[error("constraint not satisfiable: {0}")]
    Overconstrained(String),
    #[error("no camera found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("all {attempts} camera strategies failed")]
    Exhausted { attempts: usize },
}

/// Browser-style camera capability.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<MediaStream, MediaError>;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;
}

/// Display element a stream is bound to.
#[async_trait]
pub trait VideoElement: Send + Sync {
    fn attach(&self, stream: MediaStream);

    /// Resolves once stream metadata (dimensions) is available.
    async fn wait_for_metadata(&self) -> Result<(), MediaError>;
}

// ============================================================================
// Strategies
// ============================================================================

/// One step of the fallback chain.
#[async_trait]
pub trait AcquireStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Constraints to attempt, or `None` to skip this step.
    async fn plan(&self, media: &dyn MediaDevices, facing: Facing) -> Option<StreamConstraints>;
}

/// Pick a video input whose label names the wanted facing.
pub struct LabeledDevice;

#[async_trait]
impl AcquireStrategy for LabeledDevice {
    fn name(&self) -> &'static str {
        "labeled-device"
    }

    async fn plan(&self, media: &dyn MediaDevices, facing: Facing) -> Option<StreamConstraints> {
        let devices = match media.enumerate_devices().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "Device enumeration failed");
                return None;
            }
        };

        devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .find(|d| facing.matches_label(&d.label))
            .map(|d| StreamConstraints::Device(d.device_id))
    }
}

pub struct FacingMode(pub Strictness);

#[async_trait]
impl AcquireStrategy for FacingMode {
    fn name(&self) -> &'static str {
        match self.0 {
            Strictness::Exact => "facing-exact",
            Strictness::Ideal => "facing-ideal",
            Strictness::Bare => "facing-bare",
        }
    }

    async fn plan(&self, _media: &dyn MediaDevices, facing: Facing) -> Option<StreamConstraints> {
        Some(StreamConstraints::Facing(facing, self.0))
    }
}

pub struct AnyCamera;

#[async_trait]
impl AcquireStrategy for AnyCamera {
    fn name(&self) -> &'static str {
        "any-camera"
    }

    async fn plan(&self, _media: &dyn MediaDevices, _facing: Facing) -> Option<StreamConstraints> {
        Some(StreamConstraints::AnyVideo)
    }
}

pub fn default_strategies() -> Vec<Box<dyn AcquireStrategy>> {
    vec![
        Box::new(LabeledDevice),
        Box::new(FacingMode(Strictness::Exact)),
        Box::new(FacingMode(Strictness::Ideal)),
        Box::new(FacingMode(Strictness::Bare)),
        Box::new(AnyCamera),
    ]
}

// ============================================================================
// CameraAcquisition
// ============================================================================

/// Which step produced the live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub strategy: &'static str,
    pub constraints: StreamConstraints,
}

pub struct CameraAcquisition<'a> {
    media: &'a dyn MediaDevices,
    video: &'a dyn VideoElement,
    ui: &'a dyn CaptureUi,
    strategies: Vec<Box<dyn AcquireStrategy>>,
}

impl<'a> CameraAcquisition<'a> {
    pub fn new(media: &'a dyn MediaDevices, video: &'a dyn VideoElement, ui: &'a dyn CaptureUi) -> Self {
        Self::with_strategies(media, video, ui, default_strategies())
    }

    pub fn with_strategies(
        media: &'a dyn MediaDevices,
        video: &'a dyn VideoElement,
        ui: &'a dyn CaptureUi,
        strategies: Vec<Box<dyn AcquireStrategy>>,
    ) -> Self {
        Self {
            media,
            video,
            ui,
            strategies,
        }
    }

    /// Run the chain. Capture stays disabled until a stream is live; on
    /// exhaustion the user is alerted once and nothing is retried.
    pub async fn start(&self, facing: Facing) -> Result<Acquired, CameraError> {
        self.ui.set_capture_enabled(false);

        if let Err(e) = self.media.get_user_media(&StreamConstraints::AnyVideo).await {
            tracing::warn!(error = %e, "Initial permission request failed, labels may be hidden");
        }

        for strategy in &self.strategies {
            let Some(constraints) = strategy.plan(self.media, facing).await else {
                tracing::debug!(strategy = strategy.name(), "Strategy skipped");
                continue;
            };

            match self.open_stream(&constraints).await {
                Ok(()) => {
                    tracing::info!(strategy = strategy.name(), "Camera stream ready");
                    return Ok(Acquired {
                        strategy: strategy.name(),
                        constraints,
                    });
                }
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "Camera strategy failed");
                }
            }
        }

        self.ui.alert(TERMINAL_ERROR);
        Err(CameraError::Exhausted {
            attempts: self.strategies.len(),
        })
    }

    async fn open_stream(&self, constraints: &StreamConstraints) -> Result<(), MediaError> {
        let stream = self.media.get_user_media(constraints).await?;
        self.video.attach(stream);
        self.video.wait_for_metadata().await?;
        self.ui.set_capture_enabled(true);
        Ok(())
    }
}
