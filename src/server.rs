//! HTTP surface.
//!
//! | Route                | Method | Response                                   |
//! |----------------------|--------|--------------------------------------------|
//! | `/api/voices`        | GET    | `{"voices": [...]}`                        |
//! | `/api/status`        | GET    | `{"status": ..., "has_voice_cloning": ...}`|
//! | `/api/stop`          | POST   | `{"status": "stopped"}`                    |
//! | `/api/generate`      | POST   | complete WAV attachment                    |
//! | `/`, `/static/*`     | GET    | browser UI files                           |

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    audio::WavBuffer,
    config::ServerConfig,
    error::ServiceError,
    generate::{self, AbortHandle, GenerationRequest, Outcome},
    model::{GenerationOptions, ModelSlot, SpeechModel},
    voices::{VoiceResolver, VoiceSelector},
};

/// Largest accepted `/api/generate` body (voice prompts included).
const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Tells the client whether a 200 carries audio or an aborted run.
pub const GENERATION_STATUS: HeaderName = HeaderName::from_static("x-generation-status");

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub model: ModelSlot,
    pub resolver: Arc<VoiceResolver>,
    pub abort: Arc<AbortHandle>,
    /// Serialises generations; the engine runs one at a time.  The guard is
    /// owned by the blocking worker, not the handler.
    pub generation: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(model: ModelSlot, resolver: VoiceResolver) -> Self {
        Self {
            model,
            resolver: Arc::new(resolver),
            abort: Arc::new(AbortHandle::new()),
            generation: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/voices", get(list_voices))
        .route("/api/status", get(status))
        .route("/api/stop", post(stop))
        .route("/api/generate", post(generate_speech))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct VoicesResponse {
    voices: Vec<String>,
}

async fn list_voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    let voices = state.model.get().map(|m| m.voices()).unwrap_or_default();
    Json(VoicesResponse { voices })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    has_voice_cloning: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(match state.model.get() {
        Some(model) => StatusResponse { status: "ready", has_voice_cloning: model.has_voice_cloning() },
        None => StatusResponse { status: "model_not_loaded", has_voice_cloning: false },
    })
}

#[derive(Debug, Serialize)]
struct StopResponse {
    status: &'static str,
}

async fn stop(State(state): State<AppState>) -> Json<StopResponse> {
    let in_flight = state.abort.stop();
    info!("Stop request received (requests in flight: {})", in_flight);
    Json(StopResponse { status: "stopped" })
}

async fn generate_speech(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let model = state.model.get().ok_or(ServiceError::ModelUnavailable)?;
    let registration = state.abort.register();
    let cancel = registration.token().clone();
    let mut request = read_form(multipart).await?;

    let selector = std::mem::take(&mut request.voice);
    let voice = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Generation aborted by user while resolving the voice");
            return Ok(aborted_response());
        }
        voice = state.resolver.resolve(&model, selector) => voice?,
    };

    let turn = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Generation aborted by user while waiting for the engine");
            return Ok(aborted_response());
        }
        turn = state.generation.clone().lock_owned() => turn,
    };

    let outcome = generate::dispatch(&state.model, voice, request, cancel, turn).await;
    drop(registration);

    Ok(match outcome? {
        Outcome::Completed(wav) => wav_response(wav),
        Outcome::Aborted { .. } => aborted_response(),
    })
}

fn wav_response(wav: WavBuffer) -> Response {
    let len = wav.as_bytes().len();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=output.wav")),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
            (GENERATION_STATUS, HeaderValue::from_static("completed")),
        ],
        wav.into_bytes(),
    )
        .into_response()
}

fn aborted_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (header::CONTENT_LENGTH, HeaderValue::from(0usize)),
            (GENERATION_STATUS, HeaderValue::from_static("aborted")),
        ],
        Vec::<u8>::new(),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Form decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Treat an empty or whitespace-only field as absent.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>, ServiceError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| ServiceError::BadRequest(format!("invalid {name} '{v}': {e}")))
        })
        .transpose()
}

/// `temperature` must be a finite float; `NaN` and `inf` parse but mean nothing
/// to the sampler.
fn parse_temperature(value: Option<String>) -> Result<Option<f32>, ServiceError> {
    match parse_field::<f32>("temperature", value)? {
        Some(t) if !t.is_finite() => {
            Err(ServiceError::BadRequest(format!("invalid temperature '{t}': must be finite")))
        }
        parsed => Ok(parsed),
    }
}

fn form_error(e: axum::extract::multipart::MultipartError) -> ServiceError {
    ServiceError::BadRequest(format!("invalid multipart form: {e}"))
}

/// Decode the `/api/generate` multipart form.
///
/// Fields: `text` (required), `voice`, `file`, `url`, `seed`, `temperature`,
/// `lsd_steps`.  An uploaded file wins over a URL, which wins over a voice
/// name; with none of them the default voice is used.
pub async fn read_form(mut multipart: Multipart) -> Result<GenerationRequest, ServiceError> {
    let mut text = None;
    let mut voice = None;
    let mut upload = None;
    let mut url = None;
    let (mut seed, mut temperature, mut lsd_steps) = (None, None, None);

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_owned).filter(|f| !f.is_empty());
                let bytes = field.bytes().await.map_err(form_error)?;
                if filename.is_some() || !bytes.is_empty() {
                    upload = Some(VoiceSelector::Upload { filename, bytes: bytes.to_vec() });
                }
            }
            "text" => text = Some(field.text().await.map_err(form_error)?),
            "voice" => voice = non_empty(field.text().await.map_err(form_error)?),
            "url" => url = non_empty(field.text().await.map_err(form_error)?),
            "seed" => seed = non_empty(field.text().await.map_err(form_error)?),
            "temperature" => temperature = non_empty(field.text().await.map_err(form_error)?),
            "lsd_steps" => lsd_steps = non_empty(field.text().await.map_err(form_error)?),
            _ => {}
        }
    }

    let text = text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServiceError::BadRequest("text is required".to_string()))?;

    let voice = upload
        .or(url.map(VoiceSelector::Url))
        .or(voice.map(VoiceSelector::Predefined))
        .unwrap_or_default();

    let options = GenerationOptions {
        seed: parse_field("seed", seed)?,
        temperature: parse_temperature(temperature)?,
        decode_steps: parse_field("lsd_steps", lsd_steps)?,
    };

    Ok(GenerationRequest { text, voice, options })
}

// ─────────────────────────────────────────────────────────────────────────────
// Serve
// ─────────────────────────────────────────────────────────────────────────────

/// Bind, start loading the model in the background, and serve until Ctrl-C.
///
/// The listener is up before loading finishes; `/api/status` reports
/// `model_not_loaded` until `load` returns.  A failed load is logged and the
/// server keeps answering 503 for generation.
pub async fn serve<F>(config: ServerConfig, load: F) -> Result<()>
where
    F: FnOnce() -> Result<Arc<dyn SpeechModel>> + Send + 'static,
{
    let slot = ModelSlot::new();
    let resolver = VoiceResolver::new(config.default_voice.clone(), config.download_timeout())?;
    let app = router(AppState::new(slot.clone(), resolver), &config.static_dir);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    tokio::spawn(async move {
        info!("Loading model…");
        match tokio::task::spawn_blocking(load).await {
            Ok(Ok(model)) => match slot.install(model) {
                Ok(()) => info!("Model loaded successfully"),
                Err(e) => error!("{e:#}"),
            },
            Ok(Err(e)) => error!("Failed to load model: {e:#}"),
            Err(e) => error!("Model loading task failed: {e}"),
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
