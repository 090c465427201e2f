use async_trait::async_trait;
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ProxyError;

pub const NUM_INFERENCE_STEPS: u64 = 20;
pub const GUIDANCE_SCALE: f64 = 7.5;
pub const OUTPUT_WIDTH: u64 = 512;
pub const OUTPUT_HEIGHT: u64 = 512;

/// Job API of the hosted model. Responses are relayed to clients verbatim.
#[async_trait]
pub trait PredictionProvider: Send + Sync {
    async fn create_prediction(
        &self,
        token: &str,
        model: &str,
        input: Map<String, Value>,
    ) -> Result<Value, ProxyError>;

    async fn get_prediction(&self, token: &str, id: &str) -> Result<Value, ProxyError>;
}

pub struct ReplicateClient {
    api_base: String,
    http: HttpClient,
}

impl ReplicateClient {
    pub fn new(api_base: &str, user_agent: &str) -> Result<Self, ProxyError> {
        let http = HttpClient::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| ProxyError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn model_predictions_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}/predictions", self.api_base, model.trim_matches('/'))
    }

    fn prediction_endpoint(&self, id: &str) -> String {
        format!("{}/predictions/{}", self.api_base, id)
    }
}

#[async_trait]
impl PredictionProvider for ReplicateClient {
    async fn create_prediction(
        &self,
        token: &str,
        model: &str,
        input: Map<String, Value>,
    ) -> Result<Value, ProxyError> {
        let endpoint = self.model_predictions_endpoint(model);
        debug!(%endpoint, "creating prediction");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(|err| ProxyError::Transport(format!("{endpoint}: {err}")))?;
        response_json_or_error(response).await
    }

    async fn get_prediction(&self, token: &str, id: &str) -> Result<Value, ProxyError> {
        let endpoint = self.prediction_endpoint(id);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ProxyError::Transport(format!("{endpoint}: {err}")))?;
        response_json_or_error(response).await
    }
}

async fn response_json_or_error(response: HttpResponse) -> Result<Value, ProxyError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ProxyError::Transport(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            detail: upstream_detail(&body),
        });
    }
    serde_json::from_str(&body).map_err(|err| ProxyError::Upstream {
        status: status.as_u16(),
        detail: format!("invalid JSON payload: {err}"),
    })
}

/// The provider's own `detail` when present, else the raw body.
fn upstream_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .get("detail")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Drop null fields from a request body.
pub fn strip_nulls(body: Map<String, Value>) -> Map<String, Value> {
    body.into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

/// Model input for an edit request: the caller's prompt and image plus the
/// fixed generation parameters.
pub fn build_model_input(body: &Map<String, Value>) -> Map<String, Value> {
    let mut input = Map::new();
    let prompt = body
        .get("prompt")
        .filter(|value| !matches!(value, Value::String(text) if text.is_empty()))
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));
    input.insert("prompt".to_string(), prompt);
    if let Some(image) = body
        .get("input_image")
        .filter(|value| !matches!(value, Value::String(text) if text.trim().is_empty()))
    {
        input.insert("image".to_string(), image.clone());
    }
    input.insert(
        "num_inference_steps".to_string(),
        Value::from(NUM_INFERENCE_STEPS),
    );
    input.insert("guidance_scale".to_string(), Value::from(GUIDANCE_SCALE));
    input.insert("width".to_string(), Value::from(OUTPUT_WIDTH));
    input.insert("height".to_string(), Value::from(OUTPUT_HEIGHT));
    input
}

/// Prediction ids are opaque but must stay a single path segment.
pub fn is_valid_prediction_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
