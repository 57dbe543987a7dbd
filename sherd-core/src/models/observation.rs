use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted capture and its inference result. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Observation {
    pub id: i64,
    pub filename: String,
    pub image_url: Option<String>,
    pub label: Option<String>,
    pub estimated_age: Option<String>,
    pub confidence: Option<f64>,
    pub raw_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewObservation {
    pub filename: String,
    pub image_url: String,
    pub label: Option<String>,
    pub estimated_age: Option<String>,
    pub confidence: Option<f64>,
    pub raw_response: String,
}
