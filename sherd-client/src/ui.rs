//! The page surface the capture pipeline drives.

use crate::capture::CapturePayload;

pub trait CaptureUi: Send + Sync {
    /// The only readiness signal: the capture control's enabled state.
    fn set_capture_enabled(&self, enabled: bool);

    /// Last state given to `set_capture_enabled`; `false` before any call.
    fn is_capture_enabled(&self) -> bool;

    /// Blocking, user-visible error.
    fn alert(&self, message: &str);

    /// Local preview of the captured frame.
    fn show_preview(&self, payload: &CapturePayload);

    /// Inline status/result line.
    fn show_status(&self, message: &str);

    /// Leave the capture view for `location`.
    fn navigate(&self, location: &str);
}
