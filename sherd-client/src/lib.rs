//! Capture-side components: camera acquisition, frame encoding, upload and
//! the recent-observations listing.

pub mod camera;
pub mod capture;
pub mod listing;
pub mod session;
pub mod still_camera;
pub mod ui;
pub mod upload;

pub use camera::{CameraAcquisition, CameraError, Facing, MediaDevices, VideoElement};
pub use capture::{capture, CaptureError, CapturePayload, FrameSource, StillFrame};
pub use listing::{ListingClient, ListingState, ListingView};
pub use session::CaptureSession;
pub use still_camera::{StillCamera, StillVideo};
pub use ui::CaptureUi;
pub use upload::{UploadClient, UploadOutcome};
