//! Analysis subsystem: upload → disk → inference → observation row
//!
//! The file is always written first. After that a row is recorded no matter
//! how the inference call went, except when no API key is configured.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use sherd_core::inference::failure_body;
use sherd_core::{
    Analysis, InferenceBackend, InferenceError, NewObservation, ObservationStore, SherdError,
    INSTRUCTION,
};
use thiserror::Error;

use super::uploads::UploadDir;

/// The `photo` field of an analyze request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnalyzeResponse {
    pub id: i64,
    pub filename: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub label: Option<String>,
    pub estimated_age: Option<String>,
    pub confidence: Option<f64>,
    pub raw_response: Value,
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("No file uploaded")]
    NoFile,

    #[error("{0} not set in environment")]
    MissingCredential(String),

    #[error("Storage error: {0}")]
    Storage(#[from] SherdError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AnalyzeError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalyzeError::NoFile)
    }
}

pub struct AnalysisService {
    store: ObservationStore,
    uploads: UploadDir,
    backend: Arc<dyn InferenceBackend>,
}

impl AnalysisService {
    pub fn new(store: ObservationStore, uploads: UploadDir, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            store,
            uploads,
            backend,
        }
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn uploads(&self) -> &UploadDir {
        &self.uploads
    }

    pub async fn analyze(&self, file: Option<UploadedFile>) -> Result<AnalyzeResponse, AnalyzeError> {
        let file = file.ok_or(AnalyzeError::NoFile)?;

        let stored = self.uploads.save(&file.original_name, &file.bytes).await?;
        let image_base64 = BASE64.encode(self.uploads.read(&stored).await?);

        let (analysis, raw) = match self.backend.analyze(&image_base64, INSTRUCTION).await {
            Ok(reply) => (Analysis::from_body(&reply.body), reply.body),
            Err(InferenceError::MissingApiKey(var)) => {
                tracing::error!(filename = %stored.filename, "Inference API key missing, no row written");
                return Err(AnalyzeError::MissingCredential(var));
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Inference call failed, storing observation without classification"
                );
                (Analysis::from_failure(&e), failure_body(&e))
            }
        };

        let classification = analysis.classification();
        let row = self
            .store
            .insert(NewObservation {
                filename: stored.filename.clone(),
                image_url: stored.url.clone(),
                label: classification.label.clone(),
                estimated_age: classification.estimated_age.clone(),
                confidence: classification.confidence,
                raw_response: raw.to_string(),
            })
            .await?;

        Ok(AnalyzeResponse {
            id: row.id,
            filename: stored.filename,
            image_url: stored.url,
            label: classification.label,
            estimated_age: classification.estimated_age,
            confidence: classification.confidence,
            raw_response: classification.notes.map(Value::String).unwrap_or(raw),
        })
    }
}
