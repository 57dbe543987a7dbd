//! One capture-to-upload cycle, as run by the capture button.

use crate::capture::{capture, CapturePayload, FrameSource};
use crate::ui::CaptureUi;
use crate::upload::{UploadClient, UploadOutcome};

pub const SENDING_MESSAGE: &str = "Sending to server...";
pub const NOT_READY_MESSAGE: &str = "Camera is not ready yet.";

pub struct CaptureSession<'a> {
    source: &'a dyn FrameSource,
    ui: &'a dyn CaptureUi,
    uploader: &'a UploadClient,
}

impl<'a> CaptureSession<'a> {
    pub fn new(source: &'a dyn FrameSource, ui: &'a dyn CaptureUi, uploader: &'a UploadClient) -> Self {
        Self {
            source,
            ui,
            uploader,
        }
    }

    /// Capture, preview immediately, upload, then render the outcome.
    /// Returns `None` when the control is disabled or capture produced
    /// nothing; no upload is made in either case.
    pub async fn on_capture(&self) -> Option<UploadOutcome> {
        if !self.ui.is_capture_enabled() {
            tracing::debug!("Capture requested before the camera was ready");
            self.ui.show_status(NOT_READY_MESSAGE);
            return None;
        }

        let payload = match capture(self.source) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Capture failed");
                self.ui.show_status(&e.to_string());
                return None;
            }
        };

        Some(self.submit(&payload).await)
    }

    /// Upload an already captured payload.
    pub async fn submit(&self, payload: &CapturePayload) -> UploadOutcome {
        self.ui.show_preview(payload);
        self.ui.show_status(SENDING_MESSAGE);

        let outcome = self.uploader.upload(payload).await;
        render(self.ui, &outcome);
        outcome
    }
}

pub fn render(ui: &dyn CaptureUi, outcome: &UploadOutcome) {
    match outcome {
        UploadOutcome::Saved { location, .. } => ui.navigate(location),
        other => ui.show_status(&other.message()),
    }
}
