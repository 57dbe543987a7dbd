//! Listing client: fetch recent observations and render them, optionally
//! highlighting the one just created.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

pub const OBSERVATIONS_PATH: &str = "/api/observations";
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// Delay before the highlighted item is scrolled to and marked.
pub const HIGHLIGHT_SETTLE: Duration = Duration::from_millis(200);
/// How long the marker stays once applied.
pub const HIGHLIGHT_DURATION: Duration = Duration::from_millis(4000);

pub const EMPTY_MESSAGE: &str = "No captures yet. Take one from the camera page.";

/// Row as served by `GET /api/observations`. Every field is optional so a
/// partial row still renders.
#[derive(Debug, Clone, Default)]
pub struct ObservationRow {
    pub id: Option<Value>,
    pub filename: Option<String>,
    pub image_url: Option<String>,
    pub label: Option<String>,
    pub estimated_age: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: Option<String>,
}

impl ObservationRow {
    /// Read each field on its own. A field with an unexpected type is
    /// treated as missing; the rest of the row is kept.
    pub fn from_json(value: &Value) -> Self {
        let field = |name: &str| value.get(name).filter(|v| !v.is_null());

        Self {
            id: field("id").cloned(),
            filename: field("filename").and_then(text_field),
            image_url: field("image_url").and_then(text_field),
            label: field("label").and_then(text_field),
            estimated_age: field("estimated_age").and_then(text_field),
            confidence: field("confidence").and_then(number_field),
            created_at: field("created_at").and_then(text_field),
        }
    }
}

fn text_field(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_field(v: &Value) -> Option<f64> {
    let number: f64 = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingItem {
    pub id: Option<String>,
    pub image_src: String,
    pub label: String,
    pub estimated_age: String,
    pub confidence: String,
    pub captured: String,
}

impl ListingItem {
    pub fn from_row(row: &ObservationRow, base_url: &str) -> Self {
        Self {
            id: row.id.as_ref().and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }),
            image_src: image_src(row, base_url),
            label: non_empty(&row.label).unwrap_or("Unknown").to_string(),
            estimated_age: non_empty(&row.estimated_age).unwrap_or("N/A").to_string(),
            confidence: row
                .confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "N/A".to_string()),
            captured: row.created_at.clone().unwrap_or_default(),
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// Absolute URLs pass through; relative ones are joined to the backend base.
pub fn image_src(row: &ObservationRow, base_url: &str) -> String {
    let relative = match (non_empty(&row.image_url), non_empty(&row.filename)) {
        (Some(url), _) => url.to_string(),
        (None, Some(name)) => format!("{}{}", UPLOADS_PREFIX, name),
        (None, None) => return String::new(),
    };

    if relative.starts_with("http") {
        relative
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), relative)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Highlight {
    index: usize,
    applied_at: Instant,
}

/// Rendered list plus the transient highlight marker.
#[derive(Debug, Clone)]
pub struct ListingView {
    items: Vec<ListingItem>,
    target: Option<usize>,
    requested_at: Option<Instant>,
    highlight: Option<Highlight>,
}

impl ListingView {
    pub fn new(items: Vec<ListingItem>) -> Self {
        Self {
            items,
            target: None,
            requested_at: None,
            highlight: None,
        }
    }

    pub fn items(&self) -> &[ListingItem] {
        &self.items
    }

    /// Schedule a highlight for the item whose id equals `id`. Returns whether
    /// such an item exists.
    pub fn request_highlight(&mut self, id: &str, now: Instant) -> bool {
        self.target = self.items.iter().position(|i| i.id.as_deref() == Some(id));
        self.requested_at = self.target.map(|_| now);
        self.highlight = None;
        self.target.is_some()
    }

    /// Advance timers: apply the marker after the settle delay, drop it once
    /// it has been shown for the full duration.
    pub fn tick(&mut self, now: Instant) {
        if let (Some(index), Some(requested)) = (self.target, self.requested_at) {
            if self.highlight.is_none() && now.duration_since(requested) >= HIGHLIGHT_SETTLE {
                self.highlight = Some(Highlight {
                    index,
                    applied_at: now,
                });
                self.target = None;
                self.requested_at = None;
            }
        }

        if let Some(h) = &self.highlight {
            if now.duration_since(h.applied_at) >= HIGHLIGHT_DURATION {
                self.highlight = None;
            }
        }
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.highlight.as_ref().map(|h| h.index)
    }

    /// Item to scroll into view: the pending or active highlight.
    pub fn scroll_target(&self) -> Option<usize> {
        self.highlighted().or(self.target)
    }

    pub fn is_highlighted(&self, index: usize) -> bool {
        self.highlighted() == Some(index)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, item) in self.items.iter().enumerate() {
            let marker = if self.is_highlighted(i) { "▶" } else { " " };
            out.push_str(&format!(
                "{} {}\n    Estimated age: {}\n    Confidence: {}\n    Captured: {}\n    Image: {}\n",
                marker, item.label, item.estimated_age, item.confidence, item.captured, item.image_src
            ));
        }
        out
    }
}

/// What the listing page shows after loading.
#[derive(Debug, Clone)]
pub enum ListingState {
    Loaded(ListingView),
    Empty,
    ServerError(u16),
    NetworkError(String),
}

impl ListingState {
    /// User-facing text for the non-list states.
    pub fn message(&self) -> Option<String> {
        match self {
            ListingState::Loaded(_) => None,
            ListingState::Empty => Some(EMPTY_MESSAGE.to_string()),
            ListingState::ServerError(code) => Some(format!("Server error: {}", code)),
            ListingState::NetworkError(e) => Some(format!("Network error: {}", e)),
        }
    }
}

/// Build the page state from a parsed body.
pub fn build_state(rows: &Value, base_url: &str) -> ListingState {
    let Some(array) = rows.as_array().filter(|a| !a.is_empty()) else {
        return ListingState::Empty;
    };

    let items = array
        .iter()
        .map(ObservationRow::from_json)
        .map(|row| ListingItem::from_row(&row, base_url))
        .collect();

    ListingState::Loaded(ListingView::new(items))
}

#[derive(Debug, Clone)]
pub struct ListingClient {
    client: Client,
    base_url: String,
}

impl ListingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self) -> ListingState {
        let url = format!("{}{}", self.base_url, OBSERVATIONS_PATH);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Fetching observations failed");
                return ListingState::NetworkError(e.to_string());
            }
        };

        if !response.status().is_success() {
            return ListingState::ServerError(response.status().as_u16());
        }

        match response.json::<Value>().await {
            Ok(rows) => build_state(&rows, &self.base_url),
            Err(e) => ListingState::NetworkError(e.to_string()),
        }
    }

    /// Fetch and schedule the highlight named by the `highlight` parameter.
    pub async fn load(&self, highlight: Option<&str>, now: Instant) -> ListingState {
        let mut state = self.fetch().await;
        if let (ListingState::Loaded(view), Some(id)) = (&mut state, highlight) {
            if !view.request_highlight(id, now) {
                tracing::debug!(id, "Highlight target not in listing");
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE: &str = "http://localhost:3000";

    fn row(id: i64) -> ObservationRow {
        ObservationRow {
            id: Some(Value::from(id)),
            filename: Some(format!("{}.png", id)),
            image_url: Some(format!("/uploads/{}.png", id)),
            ..Default::default()
        }
    }

    fn view(ids: &[i64]) -> ListingView {
        ListingView::new(ids.iter().map(|&i| ListingItem::from_row(&row(i), BASE)).collect())
    }

    #[test]
    fn test_item_defaults() {
        let item = ListingItem::from_row(&row(1), BASE);
        assert_eq!(item.id.as_deref(), Some("1"));
        assert_eq!(item.label, "Unknown");
        assert_eq!(item.estimated_age, "N/A");
        assert_eq!(item.confidence, "N/A");
    }

    #[test]
    fn test_confidence_two_decimals() {
        let r = ObservationRow {
            confidence: Some(0.8),
            label: Some("clay shard".to_string()),
            ..row(1)
        };
        let item = ListingItem::from_row(&r, BASE);
        assert_eq!(item.confidence, "0.80");
        assert_eq!(item.label, "clay shard");
    }

    #[test]
    fn test_image_src_rules() {
        assert_eq!(image_src(&row(3), BASE), "http://localhost:3000/uploads/3.png");

        let absolute = ObservationRow {
            image_url: Some("https://cdn.example/x.png".to_string()),
            ..Default::default()
        };
        assert_eq!(image_src(&absolute, BASE), "https://cdn.example/x.png");

        let filename_only = ObservationRow {
            filename: Some("f.png".to_string()),
            ..Default::default()
        };
        assert_eq!(image_src(&filename_only, "http://h/"), "http://h/uploads/f.png");

        assert_eq!(image_src(&ObservationRow::default(), BASE), "");
    }

    #[test]
    fn test_highlight_applied_then_removed() {
        let start = Instant::now();
        let mut v = view(&[3, 2, 1]);

        assert!(v.request_highlight("2", start));
        assert_eq!(v.scroll_target(), Some(1));
        assert_eq!(v.highlighted(), None);

        v.tick(start + HIGHLIGHT_SETTLE);
        assert!(v.is_highlighted(1));
        assert!(!v.is_highlighted(0) && !v.is_highlighted(2));
        assert!(v.render().contains("▶ Unknown"));

        v.tick(start + HIGHLIGHT_SETTLE + HIGHLIGHT_DURATION - Duration::from_millis(1));
        assert!(v.is_highlighted(1));

        v.tick(start + HIGHLIGHT_SETTLE + HIGHLIGHT_DURATION);
        assert_eq!(v.highlighted(), None);
        assert_eq!(v.scroll_target(), None);
        assert!(!v.render().contains('▶'));
    }

    #[test]
    fn test_highlight_unknown_id_is_ignored() {
        let start = Instant::now();
        let mut v = view(&[1]);
        assert!(!v.request_highlight("99", start));
        v.tick(start + Duration::from_secs(1));
        assert_eq!(v.highlighted(), None);
    }

    #[test]
    fn test_mistyped_field_keeps_rest_of_row() {
        let rows = serde_json::json!([
            {"id": 7, "filename": "7.png", "image_url": "/uploads/7.png", "label": "bead", "confidence": "0.5"},
            {"id": 6, "filename": "6.png", "label": ["not", "text"], "estimated_age": {"from": 1200},
             "confidence": "high", "created_at": 1767225600}
        ]);

        let ListingState::Loaded(mut view) = build_state(&rows, BASE) else {
            panic!("Expected Loaded state");
        };

        let first = &view.items()[0];
        assert_eq!(first.id.as_deref(), Some("7"));
        assert_eq!(first.label, "bead");
        assert_eq!(first.confidence, "0.50");
        assert_eq!(first.image_src, "http://localhost:3000/uploads/7.png");

        let second = &view.items()[1];
        assert_eq!(second.id.as_deref(), Some("6"));
        assert_eq!(second.label, "Unknown");
        assert_eq!(second.estimated_age, "N/A");
        assert_eq!(second.confidence, "N/A");
        assert_eq!(second.captured, "1767225600");
        assert_eq!(second.image_src, "http://localhost:3000/uploads/6.png");

        assert!(view.request_highlight("7", Instant::now()));
        assert_eq!(view.scroll_target(), Some(0));
    }

    #[test]
    fn test_non_object_row_renders_defaults() {
        let ListingState::Loaded(view) = build_state(&serde_json::json!(["oops", null]), BASE) else {
            panic!("Expected Loaded state");
        };
        assert_eq!(view.items().len(), 2);
        assert_eq!(view.items()[0].label, "Unknown");
        assert_eq!(view.items()[1].image_src, "");
    }

    #[test]
    fn test_empty_array_is_empty_state() {
        let state = build_state(&serde_json::json!([]), BASE);
        assert!(matches!(state, ListingState::Empty));
        assert_eq!(state.message().as_deref(), Some(EMPTY_MESSAGE));

        assert!(matches!(build_state(&serde_json::json!({"x": 1}), BASE), ListingState::Empty));
    }

    #[tokio::test]
    async fn test_fetch_and_highlight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/observations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 2, "filename": "2.png", "image_url": "/uploads/2.png", "label": "bead",
                 "estimated_age": "Roman", "confidence": 0.5, "raw_response": "{}", "created_at": "2026-01-01T00:00:00Z"},
                {"id": 1, "filename": "1.png", "image_url": "/uploads/1.png", "label": null,
                 "estimated_age": null, "confidence": null, "raw_response": null, "created_at": "2025-12-31T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let client = ListingClient::new(server.uri());
        let now = Instant::now();
        let state = client.load(Some("1"), now).await;

        let ListingState::Loaded(mut view) = state else {
            panic!("Expected Loaded state");
        };
        assert_eq!(view.items().len(), 2);
        assert_eq!(view.items()[0].label, "bead");
        assert_eq!(view.items()[0].confidence, "0.50");
        assert_eq!(view.items()[0].image_src, format!("{}/uploads/2.png", server.uri()));
        assert_eq!(view.scroll_target(), Some(1));

        view.tick(now + HIGHLIGHT_SETTLE);
        assert_eq!(view.highlighted(), Some(1));
    }

    #[tokio::test]
    async fn test_server_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = ListingClient::new(server.uri()).fetch().await;
        assert_eq!(state.message().as_deref(), Some("Server error: 500"));
    }

    #[tokio::test]
    async fn test_network_error_state() {
        let state = ListingClient::new("http://127.0.0.1:1").fetch().await;
        assert!(matches!(state, ListingState::NetworkError(_)));
        assert!(state.message().unwrap().starts_with("Network error: "));
    }
}
