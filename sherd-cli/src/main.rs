//! sherd-cli — terminal frontend for the Sherd capture service
//!
//! # Subcommands
//! - `capture <image> [--display WxH]` — open a still image as the camera,
//!   capture a frame, upload it, then show the listing
//! - `upload <file>`                     — upload a file unchanged
//! - `recent [--highlight ID] [--json]`  — recent observations
//! - `status`                            — show server health

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use clap::{Parser, Subcommand};
use sherd_client::listing::HIGHLIGHT_SETTLE;
use sherd_client::session::render;
use sherd_client::{
    CameraAcquisition, CapturePayload, CaptureSession, CaptureUi, Facing, ListingClient, ListingState,
    StillCamera, StillFrame, StillVideo, UploadClient, UploadOutcome,
};

const DEFAULT_SERVER: &str = "http://localhost:3000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "sherd-cli", version, about = "Capture, upload and browse Sherd observations")]
struct Cli {
    /// Sherd server URL (overrides SHERD_SERVER_URL env var)
    #[arg(long, env = "SHERD_SERVER_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Capture a still image as a PNG frame and upload it
    Capture {
        /// Image standing in for the camera frame
        image: PathBuf,

        /// Display size used when the image reports no size, e.g. 640x480
        #[arg(long, value_parser = parse_display)]
        display: Option<(u32, u32)>,
    },

    /// Upload a file as-is
    Upload {
        file: PathBuf,
    },

    /// List recent observations
    Recent {
        /// Observation id to highlight
        #[arg(long)]
        highlight: Option<String>,

        /// Print the raw JSON rows
        #[arg(long)]
        json: bool,
    },

    /// Show Sherd server status
    Status,
}

fn parse_display(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", s))?;
    let w = w.trim().parse().map_err(|_| format!("bad width in {}", s))?;
    let h = h.trim().parse().map_err(|_| format!("bad height in {}", s))?;
    Ok((w, h))
}

/// `highlight` query parameter of a listing location.
fn highlight_from_location(location: &str) -> Option<String> {
    let (_, query) = location.split_once('?')?;
    let url = reqwest::Url::parse(&format!("http://listing.invalid/?{}", query)).ok()?;
    let highlight = url
        .query_pairs()
        .find(|(k, _)| k == "highlight")
        .map(|(_, v)| v.into_owned());
    highlight
}

// ============================================================================
// Terminal UI
// ============================================================================

#[derive(Default)]
struct TerminalUi {
    enabled: AtomicBool,
    location: Mutex<Option<String>>,
}

impl TerminalUi {
    fn navigated_to(&self) -> Option<String> {
        self.location.lock().ok().and_then(|l| l.clone())
    }
}

impl CaptureUi for TerminalUi {
    fn set_capture_enabled(&self, enabled: bool) {
        tracing::debug!(enabled, "Capture control");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capture_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn alert(&self, message: &str) {
        eprintln!("sherd-cli: {}", message);
    }

    fn show_preview(&self, payload: &CapturePayload) {
        println!(
            "Captured {}x{} frame ({} bytes)",
            payload.width,
            payload.height,
            payload.bytes.len()
        );
    }

    fn show_status(&self, message: &str) {
        println!("{}", message);
    }

    fn navigate(&self, location: &str) {
        if let Ok(mut l) = self.location.lock() {
            *l = Some(location.to_string());
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Failed deliveries have already been shown; only the exit status is left.
fn ensure_saved(outcome: &UploadOutcome) -> anyhow::Result<()> {
    match outcome {
        UploadOutcome::ServerError(_) | UploadOutcome::NetworkError(_) => {
            anyhow::bail!("upload was not saved")
        }
        UploadOutcome::Saved { .. } | UploadOutcome::Inline { .. } => Ok(()),
    }
}

async fn do_capture(server: &str, image: &Path, display: Option<(u32, u32)>) -> anyhow::Result<()> {
    let decoded = image::open(image)?;
    let mut frame = StillFrame::new(decoded);
    if let Some((w, h)) = display {
        frame = frame.with_display_size(w, h);
    }

    let camera = StillCamera::new(format!("Still image {}", image.display()));
    let video = StillVideo::new(frame);
    let ui = TerminalUi::default();

    let acquired = CameraAcquisition::new(&camera, &video, &ui).start(Facing::User).await?;
    tracing::debug!(strategy = acquired.strategy, "Still camera acquired");

    let uploader = UploadClient::new(server);
    let Some(outcome) = CaptureSession::new(&video, &ui, &uploader).on_capture().await else {
        std::process::exit(1);
    };
    ensure_saved(&outcome)?;

    follow_redirect(server, &ui).await
}

async fn do_upload(server: &str, file: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("capture.png")
        .to_string();

    let ui = TerminalUi::default();
    let outcome = UploadClient::new(server)
        .upload_bytes(bytes, &name, "application/octet-stream")
        .await;
    render(&ui, &outcome);
    ensure_saved(&outcome)?;

    follow_redirect(server, &ui).await
}

async fn follow_redirect(server: &str, ui: &TerminalUi) -> anyhow::Result<()> {
    match ui.navigated_to() {
        Some(location) => {
            let highlight = highlight_from_location(&location);
            do_recent(server, highlight.as_deref(), false).await
        }
        None => Ok(()),
    }
}

async fn do_recent(server: &str, highlight: Option<&str>, json: bool) -> anyhow::Result<()> {
    if json {
        let url = format!("{}{}", server, sherd_client::listing::OBSERVATIONS_PATH);
        let rows: serde_json::Value = reqwest::get(&url).await?.error_for_status()?.json().await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    match ListingClient::new(server).load(highlight, Instant::now()).await {
        ListingState::Loaded(mut view) => {
            if view.scroll_target().is_some() {
                tokio::time::sleep(HIGHLIGHT_SETTLE).await;
                view.tick(Instant::now());
            }
            print!("{}", view.render());
            Ok(())
        }
        other => {
            let message = other.message().unwrap_or_default();
            eprintln!("{}", message);
            if matches!(other, ListingState::Empty) {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
    }
}

async fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);

    match reqwest::get(&url).await {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().await.unwrap_or_default();
            println!("Sherd server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Database:     {}", body["database"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("sherd-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sherd-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Capture { image, display } => do_capture(&server, &image, display).await,
        Commands::Upload { file } => do_upload(&server, &file).await,
        Commands::Recent { highlight, json } => do_recent(&server, highlight.as_deref(), json).await,
        Commands::Status => do_status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("sherd-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
