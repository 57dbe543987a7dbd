//! Upload directory: stores each uploaded image under a fresh
//! `<millis>-<random><ext>` name and serves it under `/uploads`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sherd_core::SherdError;
use tokio::fs;
use uuid::Uuid;

pub const PUBLIC_PREFIX: &str = "/uploads";
const DEFAULT_EXTENSION: &str = ".png";

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

/// A file that has been written to disk.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub url: String,
}

impl UploadDir {
    /// Open the directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, SherdError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a new unique name derived from `original_name`.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredFile, SherdError> {
        let filename = unique_filename(Utc::now().timestamp_millis(), original_name);
        let path = self.root.join(&filename);

        fs::write(&path, bytes).await?;
        tracing::info!(filename = %filename, size = bytes.len(), "Upload written");

        Ok(StoredFile {
            url: format!("{}/{}", PUBLIC_PREFIX, filename),
            filename,
            path,
        })
    }

    pub async fn read(&self, file: &StoredFile) -> Result<Vec<u8>, SherdError> {
        Ok(fs::read(&file.path).await?)
    }
}

pub fn unique_filename(millis: i64, original_name: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}{}", millis, &random[..8], extension_of(original_name))
}

/// Lowercased `.ext` of the original name, or `.png` when it is missing or odd.
pub fn extension_of(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
