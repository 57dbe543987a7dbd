//! Upload client: one multipart POST to `/api/analyze`, then a decision on
//! what the user sees next.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::capture::CapturePayload;

pub const ANALYZE_PATH: &str = "/api/analyze";
pub const LISTING_PAGE: &str = "recents.html";

/// What to do with the backend's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// A row was persisted: go to the listing and highlight it.
    Saved { id: String, location: String },
    /// Success without an id: show the result inline.
    Inline {
        label: Option<String>,
        estimated_age: Option<String>,
        confidence: Option<String>,
    },
    /// Non-success status from the backend.
    ServerError(String),
    /// Unreachable backend or an unreadable body.
    NetworkError(String),
}

impl UploadOutcome {
    /// Text for the inline result area.
    pub fn message(&self) -> String {
        match self {
            UploadOutcome::Saved { id, .. } => format!("Saved observation {}", id),
            UploadOutcome::Inline {
                label,
                estimated_age,
                confidence,
            } => format!(
                "Label: {} | Age: {} | Confidence: {}",
                label.as_deref().unwrap_or("N/A"),
                estimated_age.as_deref().unwrap_or("N/A"),
                confidence.as_deref().unwrap_or("N/A"),
            ),
            UploadOutcome::ServerError(msg) => format!("Server error: {}", msg),
            UploadOutcome::NetworkError(msg) => format!("Network error: {}", msg),
        }
    }
}

/// Listing location that highlights `id`.
pub fn listing_location(id: &str) -> String {
    let query: String = reqwest::Url::parse("http://listing.invalid/")
        .map(|mut url| {
            url.query_pairs_mut().append_pair("highlight", id);
            url.query().unwrap_or_default().to_string()
        })
        .unwrap_or_else(|_| format!("highlight={}", id));
    format!("{}?{}", LISTING_PAGE, query)
}

/// Decide the outcome from a status and raw body. The body is parsed before
/// the status is looked at, so a non-JSON error page is a network error.
pub fn interpret_response(status: StatusCode, body: &str) -> UploadOutcome {
    let json: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return UploadOutcome::NetworkError(e.to_string()),
    };

    if !status.is_success() {
        let msg = match json.get("error").and_then(Value::as_str) {
            Some(e) => e.to_string(),
            None => json.to_string(),
        };
        return UploadOutcome::ServerError(msg);
    }

    if let Some(id) = json.get("id").and_then(id_text) {
        return UploadOutcome::Saved {
            location: listing_location(&id),
            id,
        };
    }

    UploadOutcome::Inline {
        label: json.get("label").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string),
        estimated_age: json
            .get("estimated_age")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        confidence: json.get("confidence").filter(|v| !v.is_null()).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

// Non-empty ids only; 0 and "" count as absent.
fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    client: Client,
    base_url: String,
}

impl UploadClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn upload(&self, payload: &CapturePayload) -> UploadOutcome {
        self.upload_bytes(payload.bytes.clone(), payload.file_name(), payload.mime())
            .await
    }

    /// Single attempt, never retried.
    pub async fn upload_bytes(&self, bytes: Vec<u8>, file_name: &str, mime: &str) -> UploadOutcome {
        let part = match Part::bytes(bytes).file_name(file_name.to_string()).mime_str(mime) {
            Ok(p) => p,
            Err(e) => return UploadOutcome::NetworkError(e.to_string()),
        };
        let form = Form::new().part("photo", part);

        let url = format!("{}{}", self.base_url, ANALYZE_PATH);
        let response = match self.client.post(&url).multipart(form).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Upload failed");
                return UploadOutcome::NetworkError(e.to_string());
            }
        };

        let status = response.status();
        match response.text().await {
            Ok(body) => {
                let outcome = interpret_response(status, &body);
                if let UploadOutcome::ServerError(msg) = &outcome {
                    tracing::warn!(status = status.as_u16(), error = %msg, "Server returned error");
                }
                outcome
            }
            Err(e) => UploadOutcome::NetworkError(e.to_string()),
        }
    }
}
