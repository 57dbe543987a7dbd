//! Inference client for the external multimodal API
//!
//! Provides an `InferenceBackend` trait with one HTTP implementation, plus the
//! best-effort interpretation of the returned text:
//! - **Structured**: the output parsed as the expected JSON schema
//! - **Unstructured**: anything else, kept verbatim as notes
//!
//! Both variants flow into the same persistence path.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::InferenceConfig;

/// Prompt sent alongside every image.
pub const INSTRUCTION: &str = r#"You are an expert archaeological analyst. Given the image, return a JSON object with keys:
{"label":"short label","estimated_age":"human-readable date range","confidence":0-1,"notes":"optional"}
Return valid JSON only."#;

// ============================================================================
// InferenceBackend trait
// ============================================================================

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send one base64 image with an instruction. Called once per upload,
    /// never retried.
    async fn analyze(
        &self,
        image_base64: &str,
        instruction: &str,
    ) -> Result<InferenceReply, InferenceError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Whatever the API answered, status included. A non-JSON body is kept as a
/// JSON string so it can still be stored for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceReply {
    pub status: u16,
    pub body: Value,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0} not set in environment")]
    MissingApiKey(String),
}

// ============================================================================
// Wire types (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    model: &'a str,
    input: InferInput<'a>,
}

#[derive(Debug, Serialize)]
struct InferInput<'a> {
    image_base64: &'a str,
    instruction: &'a str,
}

// ============================================================================
// HttpInferenceClient
// ============================================================================

/// Where the API key comes from. `Env` is resolved on every call so a key
/// added after startup is picked up and a missing one fails per request.
#[derive(Debug, Clone)]
pub enum ApiKeySource {
    Env(String),
    Fixed(Option<String>),
}

impl ApiKeySource {
    fn resolve(&self) -> Result<String, InferenceError> {
        let (key, name) = match self {
            ApiKeySource::Env(var) => (std::env::var(var).ok(), var.as_str()),
            ApiKeySource::Fixed(key) => (key.clone(), "API key"),
        };
        key.filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InferenceError::MissingApiKey(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: ApiKeySource,
}

impl HttpInferenceClient {
    /// Transport defaults only: no timeout override.
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: ApiKeySource::Env(config.api_key_env.clone()),
        }
    }

    /// Client with an explicit endpoint and key (for testing / integration)
    pub fn with_endpoint(endpoint: String, model: String, api_key: ApiKeySource) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            model,
            api_key,
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn analyze(
        &self,
        image_base64: &str,
        instruction: &str,
    ) -> Result<InferenceReply, InferenceError> {
        let api_key = self.api_key.resolve()?;

        let request = InferRequest {
            model: &self.model,
            input: InferInput {
                image_base64,
                instruction,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            tracing::warn!(code = status.as_u16(), "Inference API returned an error status");
        }

        Ok(InferenceReply {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Interpretation
// ============================================================================

/// Fields of the requested schema. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Option<String>,
    pub estimated_age: Option<String>,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
}

impl Classification {
    fn has_fields(&self) -> bool {
        self.label.is_some() || self.estimated_age.is_some() || self.confidence.is_some()
    }
}

/// Result of reading the model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    Structured(Classification),
    Unstructured { notes: String },
}

impl Analysis {
    /// Interpret a reply body. The text is the `output` string when present,
    /// otherwise the whole body serialized.
    pub fn from_body(body: &Value) -> Self {
        let text = match body.get("output") {
            Some(Value::String(s)) => s.clone(),
            _ => body.to_string(),
        };

        match parse_classification(&text) {
            Some(c) if c.has_fields() => Analysis::Structured(c),
            _ => {
                tracing::warn!("Inference output is not the expected JSON, keeping raw text");
                Analysis::Unstructured {
                    notes: body.to_string(),
                }
            }
        }
    }

    /// Outcome for a call that never produced a reply.
    pub fn from_failure(error: &InferenceError) -> Self {
        Analysis::Unstructured {
            notes: failure_body(error).to_string(),
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            Analysis::Structured(c) => c.clone(),
            Analysis::Unstructured { notes } => Classification {
                notes: Some(notes.clone()),
                ..Default::default()
            },
        }
    }
}

/// Audit body stored when the call itself failed.
pub fn failure_body(error: &InferenceError) -> Value {
    serde_json::json!({ "error": error.to_string() })
}

fn parse_classification(text: &str) -> Option<Classification> {
    let value: Value = serde_json::from_str(strip_code_fence(text)).ok()?;
    let obj = value.as_object()?;

    let label = obj.get("label").and_then(text_field);
    let estimated_age = obj.get("estimated_age").and_then(text_field);
    let notes = obj.get("notes").and_then(text_field);
    let confidence = obj.get("confidence").and_then(number_field).and_then(clamp_confidence);

    Some(Classification {
        label,
        estimated_age,
        confidence,
        notes,
    })
}

fn text_field(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn clamp_confidence(c: f64) -> Option<f64> {
    if !c.is_finite() {
        return None;
    }
    let clamped = c.clamp(0.0, 1.0);
    if clamped != c {
        tracing::warn!(confidence = c, "Confidence outside [0,1], clamped");
    }
    Some(clamped)
}

/// Models frequently wrap JSON in ```json fences.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, key: Option<&str>) -> HttpInferenceClient {
        HttpInferenceClient::with_endpoint(
            format!("{}/v1/infer", server.uri()),
            "vision-test".to_string(),
            ApiKeySource::Fixed(key.map(str::to_string)),
        )
    }

    #[tokio::test]
    async fn test_analyze_posts_image_and_instruction() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/infer"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(serde_json::json!({
                "model": "vision-test",
                "input": { "image_base64": "aGVsbG8=", "instruction": "describe" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "{\"label\":\"clay shard\"}"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server, Some("test-key"))
            .analyze("aGVsbG8=", "describe")
            .await
            .expect("analyze should succeed");

        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["output"], "{\"label\":\"clay shard\"}");
    }

    #[tokio::test]
    async fn test_analyze_missing_key_makes_no_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client(&server, None).analyze("aGVsbG8=", INSTRUCTION).await;
        match result {
            Err(InferenceError::MissingApiKey(_)) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_analyze_keeps_non_json_body_as_string() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let reply = client(&server, Some("k")).analyze("x", INSTRUCTION).await.unwrap();
        assert_eq!(reply.status, 502);
        assert_eq!(reply.body, Value::String("bad gateway".to_string()));
    }

    #[tokio::test]
    async fn test_analyze_does_not_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "boom"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server, Some("k")).analyze("x", INSTRUCTION).await.unwrap();
        assert_eq!(reply.status, 500);
    }

    #[test]
    fn test_env_key_source_reports_variable_name() {
        let source = ApiKeySource::Env("SHERD_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        match source.resolve() {
            Err(InferenceError::MissingApiKey(name)) => {
                assert_eq!(name, "SHERD_TEST_KEY_THAT_IS_NEVER_SET")
            }
            other => panic!("Expected MissingApiKey, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_fixed_key_is_missing() {
        assert!(ApiKeySource::Fixed(Some("  ".to_string())).resolve().is_err());
    }

    // --- interpretation ---

    #[test]
    fn test_structured_output_string() {
        let body = serde_json::json!({
            "output": "{\"label\":\"clay shard\",\"estimated_age\":\"1200-1400 CE\",\"confidence\":0.82}"
        });

        match Analysis::from_body(&body) {
            Analysis::Structured(c) => {
                assert_eq!(c.label.as_deref(), Some("clay shard"));
                assert_eq!(c.estimated_age.as_deref(), Some("1200-1400 CE"));
                assert_eq!(c.confidence, Some(0.82));
                assert!(c.notes.is_none());
            }
            other => panic!("Expected Structured, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_at_top_level() {
        let body = serde_json::json!({ "label": "bead", "confidence": 0.4 });
        let c = Analysis::from_body(&body).classification();
        assert_eq!(c.label.as_deref(), Some("bead"));
        assert_eq!(c.confidence, Some(0.4));
    }

    #[test]
    fn test_fenced_output() {
        let body = serde_json::json!({
            "output": "```json\n{\"label\":\"arrowhead\",\"notes\":\"flint\"}\n```"
        });
        let c = Analysis::from_body(&body).classification();
        assert_eq!(c.label.as_deref(), Some("arrowhead"));
        assert_eq!(c.notes.as_deref(), Some("flint"));
    }

    #[test]
    fn test_fence_tag_is_case_insensitive() {
        let body = serde_json::json!({
            "output": "```JSON\n{\"label\":\"loom weight\",\"confidence\":0.6}\n```"
        });
        let c = Analysis::from_body(&body).classification();
        assert_eq!(c.label.as_deref(), Some("loom weight"));
        assert_eq!(c.confidence, Some(0.6));
    }

    #[test]
    fn test_text_fields_stored_verbatim() {
        let body = serde_json::json!({
            "output": "{\"label\":\"  clay shard \",\"estimated_age\":\"c. 1200 CE\\n\"}"
        });
        let c = Analysis::from_body(&body).classification();
        assert_eq!(c.label.as_deref(), Some("  clay shard "));
        assert_eq!(c.estimated_age.as_deref(), Some("c. 1200 CE\n"));

        let blank = serde_json::json!({ "output": "{\"label\":\"   \",\"confidence\":0.2}" });
        assert!(Analysis::from_body(&blank).classification().label.is_none());
    }

    #[test]
    fn test_plain_text_output_is_unstructured() {
        let body = serde_json::json!({ "output": "This looks like pottery." });
        match Analysis::from_body(&body) {
            Analysis::Unstructured { notes } => {
                assert!(notes.contains("This looks like pottery."));
            }
            other => panic!("Expected Unstructured, got {:?}", other),
        }

        let c = Analysis::from_body(&body).classification();
        assert!(c.label.is_none() && c.estimated_age.is_none() && c.confidence.is_none());
        assert!(c.notes.is_some());
    }

    #[test]
    fn test_error_body_without_schema_is_unstructured() {
        let body = serde_json::json!({ "error": { "message": "model not found" } });
        assert!(matches!(Analysis::from_body(&body), Analysis::Unstructured { .. }));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let high = serde_json::json!({ "output": "{\"label\":\"a\",\"confidence\":1.7}" });
        assert_eq!(Analysis::from_body(&high).classification().confidence, Some(1.0));

        let low = serde_json::json!({ "output": "{\"label\":\"a\",\"confidence\":-3}" });
        assert_eq!(Analysis::from_body(&low).classification().confidence, Some(0.0));

        let text = serde_json::json!({ "output": "{\"label\":\"a\",\"confidence\":\"0.5\"}" });
        assert_eq!(Analysis::from_body(&text).classification().confidence, Some(0.5));
    }

    #[test]
    fn test_failure_notes_carry_error() {
        let err = InferenceError::MissingApiKey("GROQ_API_KEY".to_string());
        match Analysis::from_failure(&err) {
            Analysis::Unstructured { notes } => assert!(notes.contains("GROQ_API_KEY")),
            other => panic!("Expected Unstructured, got {:?}", other),
        }
    }
}
