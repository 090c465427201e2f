use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request bodies above this size are rejected by the proxy.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Largest inline image a client should send. The rest of the upload limit is
/// left for the JSON request around it, prompt included.
pub const MAX_INLINE_IMAGE_BYTES: usize = MAX_UPLOAD_BYTES - 64 * 1024;

/// An image handed to or returned by the provider.
///
/// Either a remote URL or an inline `data:` URL. The payload is passed through
/// untouched; the variant only records which form it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageRef {
    Url(String),
    Inline(String),
}

impl ImageRef {
    pub fn as_str(&self) -> &str {
        match self {
            ImageRef::Url(value) | ImageRef::Inline(value) => value.as_str(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageRef::Inline(_))
    }

    /// Short form for logs; inline payloads can be megabytes long.
    pub fn summary(&self) -> String {
        match self {
            ImageRef::Url(url) => url.clone(),
            ImageRef::Inline(data) => {
                let head = data.split(',').next().unwrap_or("data:");
                format!("{head},<{} bytes>", data.len())
            }
        }
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        if value.trim_start().starts_with("data:") {
            ImageRef::Inline(value)
        } else {
            ImageRef::Url(value)
        }
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        ImageRef::from(value.to_string())
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        match value {
            ImageRef::Url(value) | ImageRef::Inline(value) => value,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
            PredictionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider job as reported by `POST /api/predictions` and
/// `GET /api/predictions/{id}`.
///
/// Fields this crate does not interpret are kept in `extra` so the job can be
/// relayed without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prediction {
    pub fn new(id: impl Into<String>, status: PredictionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            output: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Value::String(error.into()));
        self
    }

    /// First image reference found in `output`.
    pub fn output_image(&self) -> Option<ImageRef> {
        let mut found = Vec::new();
        if let Some(output) = self.output.as_ref() {
            collect_output_refs(output, &mut found);
        }
        found.into_iter().next().map(ImageRef::from)
    }

    /// Message to surface for a `failed` or `canceled` job.
    pub fn failure_message(&self) -> String {
        let provided = match self.error.as_ref() {
            Some(Value::String(text)) => Some(text.trim().to_string()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        provided
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| match self.status {
                PredictionStatus::Canceled => "prediction canceled".to_string(),
                _ => "prediction failed".to_string(),
            })
    }
}

fn collect_output_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if (trimmed.starts_with("http") || trimmed.starts_with("data:"))
                && !out.iter().any(|existing| existing == trimmed)
            {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                collect_output_refs(row, out);
            }
        }
        Value::Object(obj) => {
            if let Some(url) = obj.get("url") {
                collect_output_refs(url, out);
            }
            if let Some(image) = obj.get("image") {
                collect_output_refs(image, out);
            }
        }
        _ => {}
    }
}

/// Body of `POST /api/predictions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePredictionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image: Option<ImageRef>,
}

/// Error body returned by the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            error: None,
        }
    }
}

/// One status fetch seen by a poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollObservation {
    pub prediction_id: String,
    pub status: PredictionStatus,
    pub observed_at: String,
}

impl PollObservation {
    pub fn of(prediction: &Prediction) -> Self {
        Self {
            prediction_id: prediction.id.clone(),
            status: prediction.status,
            observed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn image_ref_classifies_inline_payloads() {
        let url = ImageRef::from("https://replicate.delivery/out.png");
        let inline = ImageRef::from("data:image/png;base64,AAAA");
        assert!(!url.is_inline());
        assert!(inline.is_inline());
        assert_eq!(inline.summary(), "data:image/png;base64,<26 bytes>");
    }

    #[test]
    fn prediction_keeps_unknown_fields() -> anyhow::Result<()> {
        let raw = json!({
            "id": "abc",
            "status": "starting",
            "model": "black-forest-labs/flux-kontext-pro",
            "urls": {"get": "https://api.replicate.com/v1/predictions/abc"},
            "error": null,
        });
        let prediction: Prediction = serde_json::from_value(raw)?;
        assert_eq!(prediction.status, PredictionStatus::Starting);
        assert!(prediction.error.is_none());
        assert_eq!(
            prediction.extra.get("model"),
            Some(&json!("black-forest-labs/flux-kontext-pro"))
        );

        let back = serde_json::to_value(&prediction)?;
        assert_eq!(back["urls"]["get"], json!("https://api.replicate.com/v1/predictions/abc"));
        Ok(())
    }

    #[test]
    fn unrecognised_status_is_not_terminal() -> anyhow::Result<()> {
        let prediction: Prediction =
            serde_json::from_value(json!({"id": "abc", "status": "queued"}))?;
        assert_eq!(prediction.status, PredictionStatus::Unknown);
        assert!(!prediction.status.is_terminal());
        assert!(PredictionStatus::Canceled.is_terminal());
        Ok(())
    }

    #[test]
    fn output_image_accepts_string_list_and_object_shapes() {
        let single = Prediction::new("a", PredictionStatus::Succeeded)
            .with_output(json!("https://example.com/a.png"));
        let listed = Prediction::new("b", PredictionStatus::Succeeded)
            .with_output(json!(["", "https://example.com/b.png"]));
        let object = Prediction::new("c", PredictionStatus::Succeeded)
            .with_output(json!({"url": "https://example.com/c.png"}));
        let missing = Prediction::new("d", PredictionStatus::Succeeded).with_output(json!(42));

        assert_eq!(single.output_image(), Some(ImageRef::from("https://example.com/a.png")));
        assert_eq!(listed.output_image(), Some(ImageRef::from("https://example.com/b.png")));
        assert_eq!(object.output_image(), Some(ImageRef::from("https://example.com/c.png")));
        assert_eq!(missing.output_image(), None);
    }

    #[test]
    fn failure_message_prefers_provider_text() {
        let with_text =
            Prediction::new("a", PredictionStatus::Failed).with_error("NSFW content detected");
        let bare = Prediction::new("b", PredictionStatus::Failed);
        let canceled = Prediction::new("c", PredictionStatus::Canceled);
        assert_eq!(with_text.failure_message(), "NSFW content detected");
        assert_eq!(bare.failure_message(), "prediction failed");
        assert_eq!(canceled.failure_message(), "prediction canceled");
    }

    #[test]
    fn create_request_omits_missing_image() -> anyhow::Result<()> {
        let request = CreatePredictionRequest {
            prompt: "make it snow".to_string(),
            input_image: None,
        };
        assert_eq!(serde_json::to_value(&request)?, json!({"prompt": "make it snow"}));
        Ok(())
    }
}
