use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use paintbytext_contracts::predictions::{
    CreatePredictionRequest, ErrorEnvelope, ImageRef, PollObservation, Prediction,
    PredictionStatus, MAX_INLINE_IMAGE_BYTES, MAX_UPLOAD_BYTES,
};
use paintbytext_contracts::session::{EditHistory, HistoryError};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },
    #[error("{0}")]
    Validation(String),
    #[error("an edit is already in progress")]
    SessionBusy,
    #[error("prediction {id} still running after {elapsed_s:.1}s")]
    Timeout { id: String, elapsed_s: f64 },
    #[error("edit was abandoned")]
    Abandoned,
}

impl EditError {
    fn provider(message: impl Into<String>) -> Self {
        EditError::Provider {
            status: None,
            message: message.into(),
        }
    }

    /// Network failures and 5xx answers; the job itself may still be fine.
    pub fn is_transient(&self) -> bool {
        match self {
            EditError::Transport(_) => true,
            EditError::Provider {
                status: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }
}

impl From<HistoryError> for EditError {
    fn from(err: HistoryError) -> Self {
        EditError::Validation(err.to_string())
    }
}

/// The two calls the edit loop needs from a prediction backend.
pub trait PredictionsApi: Send + Sync {
    fn create(&self, request: &CreatePredictionRequest) -> Result<Prediction, EditError>;
    fn get(&self, id: &str) -> Result<Prediction, EditError>;
}

/// Talks to a paintbytext proxy over `/api/predictions`.
pub struct HttpPredictionsApi {
    api_base: String,
    http: HttpClient,
}

impl HttpPredictionsApi {
    pub fn new(server_url: &str) -> Self {
        let trimmed = server_url.trim().trim_end_matches('/');
        Self {
            api_base: if trimmed.is_empty() {
                DEFAULT_SERVER_URL.to_string()
            } else {
                trimmed.to_string()
            },
            http: HttpClient::new(),
        }
    }

    pub fn with_client(server_url: &str, http: HttpClient) -> Self {
        Self {
            http,
            ..Self::new(server_url)
        }
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/api/predictions", self.api_base)
    }
}

impl PredictionsApi for HttpPredictionsApi {
    fn create(&self, request: &CreatePredictionRequest) -> Result<Prediction, EditError> {
        let endpoint = self.predictions_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .json(request)
            .send()
            .map_err(|err| {
                EditError::Transport(format!("prediction request failed ({endpoint}): {err}"))
            })?;
        prediction_or_error(response, 201)
    }

    fn get(&self, id: &str) -> Result<Prediction, EditError> {
        let endpoint = format!("{}/{}", self.predictions_endpoint(), id);
        let response = self.http.get(&endpoint).send().map_err(|err| {
            EditError::Transport(format!("prediction poll failed ({endpoint}): {err}"))
        })?;
        prediction_or_error(response, 200)
    }
}

fn prediction_or_error(response: HttpResponse, expected: u16) -> Result<Prediction, EditError> {
    let code = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| EditError::Transport(format!("prediction response read failed: {err}")))?;
    if code != expected {
        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.detail.trim().to_string())
            .filter(|detail| !detail.is_empty())
            .unwrap_or_else(|| format!("prediction request failed ({code})"));
        return Err(EditError::Provider {
            status: Some(code),
            message: detail,
        });
    }
    serde_json::from_str::<Prediction>(&body).map_err(|err| EditError::Provider {
        status: Some(code),
        message: format!("unreadable prediction payload: {err}"),
    })
}

/// Delay primitive for the poll loop.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Consecutive transient fetch failures tolerated before giving up.
    pub fetch_retries: u32,
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            fetch_retries: 0,
            timeout: None,
        }
    }
}

pub fn submit_prediction<A: PredictionsApi + ?Sized>(
    api: &A,
    prompt: &str,
    input_image: Option<&ImageRef>,
) -> Result<Prediction, EditError> {
    let request = CreatePredictionRequest {
        prompt: prompt.to_string(),
        input_image: input_image.cloned(),
    };
    info!(
        input_image = %input_image.map(ImageRef::summary).unwrap_or_default(),
        "submitting edit: {prompt}"
    );
    let prediction = api.create(&request)?;
    debug!(id = %prediction.id, status = %prediction.status, "prediction created");
    Ok(prediction)
}

/// Fetch `prediction` until it reaches a terminal status.
///
/// A prediction that is already terminal is returned without any fetch.
/// `observe` sees every fetched state.
pub fn poll_prediction<A, S, F>(
    api: &A,
    prediction: Prediction,
    config: &PollConfig,
    sleeper: &S,
    mut observe: F,
) -> Result<Prediction, EditError>
where
    A: PredictionsApi + ?Sized,
    S: Sleeper + ?Sized,
    F: FnMut(&Prediction),
{
    let started = Instant::now();
    let mut current = prediction;
    let mut failures = 0u32;
    while !current.status.is_terminal() {
        if let Some(limit) = config.timeout {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                return Err(EditError::Timeout {
                    id: current.id.clone(),
                    elapsed_s: elapsed.as_secs_f64(),
                });
            }
        }
        sleeper.sleep(config.interval);
        match api.get(&current.id) {
            Ok(next) => {
                failures = 0;
                debug!(id = %next.id, status = %next.status, "polled prediction");
                observe(&next);
                current = next;
            }
            Err(err) if err.is_transient() && failures < config.fetch_retries => {
                failures += 1;
                warn!(
                    id = %current.id,
                    attempt = failures,
                    "transient poll failure, retrying: {err}"
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(current)
}

/// Turn a terminal prediction into the image it produced.
pub fn prediction_result(prediction: &Prediction) -> Result<ImageRef, EditError> {
    match prediction.status {
        PredictionStatus::Succeeded => prediction.output_image().ok_or_else(|| {
            EditError::provider(format!(
                "prediction {} succeeded without an output image",
                prediction.id
            ))
        }),
        PredictionStatus::Failed | PredictionStatus::Canceled => {
            Err(EditError::provider(prediction.failure_message()))
        }
        other => Err(EditError::provider(format!(
            "prediction {} is not finished ({other})",
            prediction.id
        ))),
    }
}

/// Submit one edit and drive it to completion.
pub fn run_edit<A, S, F>(
    api: &A,
    request: &CreatePredictionRequest,
    config: &PollConfig,
    sleeper: &S,
    mut observe: F,
) -> Result<ImageRef, EditError>
where
    A: PredictionsApi + ?Sized,
    S: Sleeper + ?Sized,
    F: FnMut(&Prediction),
{
    let created = submit_prediction(api, &request.prompt, request.input_image.as_ref())?;
    let finished = poll_prediction(api, created, config, sleeper, &mut observe)?;
    let result = prediction_result(&finished);
    match &result {
        Ok(image) => info!(id = %finished.id, output = %image.summary(), "edit succeeded"),
        Err(err) => warn!(id = %finished.id, "edit failed: {err}"),
    }
    result
}

/// An edit that has been started on a session but not yet settled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub request: CreatePredictionRequest,
    history_len: usize,
    generation: u64,
}

/// One user's in-memory editing state.
///
/// Owns the history, the processing flag and the last error. Nothing survives
/// the value being dropped.
pub struct EditSession<A: PredictionsApi, S: Sleeper = ThreadSleeper> {
    session_id: Uuid,
    api: A,
    sleeper: S,
    poll: PollConfig,
    seed_prompt: String,
    history: EditHistory,
    pending_prompt: String,
    processing: bool,
    error: Option<String>,
    observations: Vec<PollObservation>,
    generation: u64,
}

impl<A: PredictionsApi> EditSession<A, ThreadSleeper> {
    pub fn new(api: A, seed_image: ImageRef, seed_prompt: impl Into<String>) -> Self {
        Self::with_sleeper(api, ThreadSleeper, seed_image, seed_prompt)
    }
}

impl<A: PredictionsApi, S: Sleeper> EditSession<A, S> {
    pub fn with_sleeper(
        api: A,
        sleeper: S,
        seed_image: ImageRef,
        seed_prompt: impl Into<String>,
    ) -> Self {
        let seed_prompt = seed_prompt.into();
        let session_id = Uuid::new_v4();
        debug!(session = %session_id, seed = %seed_image.summary(), "edit session started");
        Self {
            session_id,
            api,
            sleeper,
            poll: PollConfig::default(),
            pending_prompt: seed_prompt.clone(),
            seed_prompt,
            history: EditHistory::seeded(seed_image),
            processing: false,
            error: None,
            observations: Vec::new(),
            generation: 0,
        }
    }

    pub fn set_poll_config(&mut self, poll: PollConfig) {
        self.poll = poll;
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn current_image(&self) -> Option<&ImageRef> {
        self.history.current_image()
    }

    /// True until the first edit has been applied to the seed.
    pub fn is_first_prompt(&self) -> bool {
        self.history.is_first_prompt()
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Text to pre-fill the next prompt with.
    pub fn pending_prompt(&self) -> &str {
        &self.pending_prompt
    }

    pub fn observations(&self) -> &[PollObservation] {
        &self.observations
    }

    /// Record `prompt` and mark the session busy.
    ///
    /// Fails with [`EditError::SessionBusy`] while another edit is running.
    pub fn begin_edit(&mut self, prompt: &str) -> Result<PendingEdit, EditError> {
        if self.processing {
            return Err(EditError::SessionBusy);
        }
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(EditError::Validation("prompt is empty".to_string()));
        }
        let request = CreatePredictionRequest {
            prompt: prompt.to_string(),
            input_image: self.history.current_image().cloned(),
        };
        check_request_size(&request)?;
        let history_len = self.history.len();
        self.history.push_prompt(prompt);
        self.processing = true;
        self.error = None;
        self.pending_prompt.clear();
        self.generation += 1;
        Ok(PendingEdit {
            request,
            history_len,
            generation: self.generation,
        })
    }

    /// Apply the outcome of a pending edit.
    ///
    /// Success appends the output image. Any failure restores the history to
    /// what it was before [`begin_edit`](Self::begin_edit) and puts the prompt
    /// back for editing. Outcomes of edits abandoned by
    /// [`start_over`](Self::start_over) are discarded.
    pub fn finish_edit(
        &mut self,
        pending: PendingEdit,
        outcome: Result<ImageRef, EditError>,
    ) -> Result<ImageRef, EditError> {
        if pending.generation != self.generation || !self.processing {
            debug!(session = %self.session_id, "discarding outcome of abandoned edit");
            return Err(EditError::Abandoned);
        }
        self.processing = false;
        match outcome {
            Ok(image) => {
                self.history.push_image(image.clone());
                Ok(image)
            }
            Err(err) => {
                self.history.truncate(pending.history_len);
                self.pending_prompt = pending.request.prompt;
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Submit `prompt` against the current image and block until it settles.
    pub fn submit(&mut self, prompt: &str) -> Result<ImageRef, EditError> {
        let pending = self.begin_edit(prompt)?;
        let mut seen = Vec::new();
        let outcome = run_edit(
            &self.api,
            &pending.request,
            &self.poll,
            &self.sleeper,
            |prediction| seen.push(PollObservation::of(prediction)),
        );
        self.observations.extend(seen);
        self.finish_edit(pending, outcome)
    }

    /// Append a new image; it becomes the input of the next edit.
    pub fn add_image(&mut self, image: ImageRef) -> Result<(), EditError> {
        if self.processing {
            return Err(EditError::SessionBusy);
        }
        self.history.push_image(image);
        Ok(())
    }

    /// Remove the round ending at step `index` and restore its prompt.
    pub fn undo(&mut self, index: usize) -> Result<(), EditError> {
        if self.processing {
            return Err(EditError::SessionBusy);
        }
        let restored = self.history.undo(index)?;
        self.pending_prompt = restored.unwrap_or_default();
        Ok(())
    }

    /// Back to the seed image. A running edit is abandoned.
    pub fn start_over(&mut self) {
        self.history.start_over();
        self.error = None;
        self.processing = false;
        self.pending_prompt = self.seed_prompt.clone();
        self.generation += 1;
    }
}

/// Reject a request the proxy would refuse for size.
fn check_request_size(request: &CreatePredictionRequest) -> Result<(), EditError> {
    let size = serde_json::to_vec(request)
        .map_err(|err| EditError::Validation(format!("unencodable request: {err}")))?
        .len();
    if size > MAX_UPLOAD_BYTES {
        return Err(EditError::Validation(format!(
            "request is too large to upload ({size} bytes, limit {MAX_UPLOAD_BYTES})"
        )));
    }
    Ok(())
}

/// Resolve a CLI argument into an image reference.
///
/// URLs and `data:` URLs pass through; anything else is read as a local file
/// and inlined as a base64 data URL.
pub fn load_image_ref(raw: &str) -> Result<ImageRef, EditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EditError::Validation("image reference is empty".to_string()));
    }
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("data:")
    {
        return Ok(ImageRef::from(trimmed));
    }

    let path = Path::new(trimmed);
    let Some(mime) = mime_for_path(path) else {
        return Err(EditError::Validation(format!(
            "unsupported image type ({})",
            path.display()
        )));
    };
    let bytes = fs::read(path).map_err(|err| {
        EditError::Validation(format!("failed to read {}: {err}", path.display()))
    })?;
    let data_url = format!("data:{mime};base64,{}", BASE64.encode(bytes));
    if data_url.len() > MAX_INLINE_IMAGE_BYTES {
        return Err(EditError::Validation(format!(
            "{} is too large to upload ({} bytes encoded, limit {MAX_INLINE_IMAGE_BYTES})",
            path.display(),
            data_url.len()
        )));
    }
    Ok(ImageRef::from(data_url))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
