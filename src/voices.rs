//! Voice Resolver: turns a request's voice selection into a [`VoiceState`].
//!
//! Predefined names go straight to the engine (which caches them).  Uploaded
//! and remote prompts are written to a request-scoped temporary file, handed
//! to the engine, and deleted again on every exit path.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    model::{SpeechModel, VoiceSource, VoiceState},
};

/// Voice used when a request names none.
pub const DEFAULT_VOICE: &str = "alba";

/// Upper bound on fetching a remote voice prompt.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Extension assumed when neither the file name nor the server says otherwise.
const DEFAULT_EXTENSION: &str = ".wav";

/// Known audio content types and the extension they are stored under.
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("audio/wav", ".wav"),
    ("audio/x-wav", ".wav"),
    ("audio/wave", ".wav"),
    ("audio/vnd.wave", ".wav"),
    ("audio/mpeg", ".mp3"),
    ("audio/mp3", ".mp3"),
    ("audio/ogg", ".ogg"),
    ("application/ogg", ".ogg"),
    ("audio/flac", ".flac"),
    ("audio/x-flac", ".flac"),
    ("audio/mp4", ".m4a"),
    ("audio/x-m4a", ".m4a"),
    ("audio/webm", ".webm"),
];

/// Extensions recognised at the end of a prompt URL.
const URL_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".flac", ".m4a"];

// ─────────────────────────────────────────────────────────────────────────────
// Selector
// ─────────────────────────────────────────────────────────────────────────────

/// Which voice a request asked for.  Exactly one variant applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VoiceSelector {
    /// The server's default voice.
    #[default]
    Default,
    Predefined(String),
    Upload {
        filename: Option<String>,
        bytes: Vec<u8>,
    },
    Url(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt file
// ─────────────────────────────────────────────────────────────────────────────

/// A voice prompt written to disk for one request.
///
/// Dropping it deletes the file and the truncated copy some engines write next
/// to it (`<stem>.trunc.wav`).  Deletion failures are logged, never raised.
#[derive(Debug)]
pub struct PromptFile {
    path: PathBuf,
}

impl PromptFile {
    /// Persist `bytes` to a fresh temporary file ending in `suffix`.
    ///
    /// The handle is closed before returning so the engine can open the file
    /// on platforms with mandatory locking.
    pub fn write(bytes: &[u8], suffix: &str) -> Result<Self> {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .prefix("voice-")
            .suffix(suffix)
            .tempfile()
            .context("Cannot create temporary voice file")?;
        file.write_all(bytes).context("Cannot write temporary voice file")?;
        let path = file
            .into_temp_path()
            .keep()
            .context("Cannot persist temporary voice file")?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncated_path(&self) -> PathBuf {
        self.path.with_extension("trunc.wav")
    }
}

impl Drop for PromptFile {
    fn drop(&mut self) {
        remove_quietly(&self.path);
        let trunc = self.truncated_path();
        if trunc.exists() {
            remove_quietly(&trunc);
        }
    }
}

/// Delete `path`, retrying once after yielding (a just-closed file can still
/// be locked on some platforms).
fn remove_quietly(path: &Path) {
    let first = match std::fs::remove_file(path) {
        Ok(()) => return,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => e,
    };
    std::thread::yield_now();
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete temp file {}: {} (first attempt: {})", path.display(), e, first);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extension inference
// ─────────────────────────────────────────────────────────────────────────────

/// Extension (with leading dot) of an uploaded file name, or `.wav`.
pub fn upload_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Extension for a downloaded prompt: declared content type first, then the
/// URL's own suffix, then `.wav`.
pub fn download_extension(content_type: Option<&str>, url: &str) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    if let Some(mime) = mime {
        if let Some((_, ext)) = CONTENT_TYPE_EXTENSIONS.iter().find(|(m, _)| *m == mime) {
            return ext.to_string();
        }
    }

    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    URL_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// VoiceResolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves [`VoiceSelector`]s against a loaded engine.
#[derive(Debug, Clone)]
pub struct VoiceResolver {
    client: reqwest::Client,
    default_voice: String,
}

impl VoiceResolver {
    /// `timeout` bounds each remote prompt download end to end.
    pub fn new(default_voice: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for voice downloads")?;
        Ok(Self { client, default_voice: default_voice.into() })
    }

    pub async fn resolve(
        &self,
        model: &Arc<dyn SpeechModel>,
        selector: VoiceSelector,
    ) -> Result<VoiceState, ServiceError> {
        match selector {
            VoiceSelector::Default => self.predefined(model, self.default_voice.clone()).await,
            VoiceSelector::Predefined(name) => self.predefined(model, name).await,
            VoiceSelector::Upload { filename, bytes } => {
                ensure_cloning(model.as_ref())?;
                let suffix = upload_extension(filename.as_deref());
                let prompt = PromptFile::write(&bytes, &suffix)
                    .map_err(|e| ServiceError::Processing(format!("{e:#}")))?;
                info!(
                    "Received file: {}, size: {} bytes, saved to {}",
                    filename.as_deref().unwrap_or("<unnamed>"),
                    bytes.len(),
                    prompt.path().display()
                );
                from_prompt(model, prompt).await
            }
            VoiceSelector::Url(url) => {
                ensure_cloning(model.as_ref())?;
                info!("Downloading voice from URL: {}", url);
                let (bytes, suffix) = self.download(&url).await?;
                let prompt = PromptFile::write(&bytes, &suffix)
                    .map_err(|e| ServiceError::Processing(format!("{e:#}")))?;
                info!(
                    "Downloaded file from URL, size: {} bytes, saved to {}",
                    bytes.len(),
                    prompt.path().display()
                );
                from_prompt(model, prompt).await
            }
        }
    }

    async fn predefined(
        &self,
        model: &Arc<dyn SpeechModel>,
        name: String,
    ) -> Result<VoiceState, ServiceError> {
        if !model.voices().iter().any(|v| *v == name) {
            return Err(ServiceError::InvalidVoice(name));
        }
        let model = Arc::clone(model);
        tokio::task::spawn_blocking(move || {
            model.state_for_voice(&VoiceSource::Predefined(name), true)
        })
        .await
        .map_err(|e| ServiceError::Processing(format!("voice task failed: {e}")))?
        .map_err(|e| ServiceError::Processing(format!("{e:#}")))
    }

    /// Fetch a remote prompt.  Any transport error, timeout or non-2xx status
    /// is a [`ServiceError::Download`].
    async fn download(&self, url: &str) -> Result<(Vec<u8>, String), ServiceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ServiceError::Download(e.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let suffix = download_extension(content_type.as_deref(), url);
        debug!(?content_type, %suffix, "Voice download response");

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Download(e.to_string()))?;
        Ok((bytes.to_vec(), suffix))
    }
}

fn ensure_cloning(model: &dyn SpeechModel) -> Result<(), ServiceError> {
    if model.has_voice_cloning() {
        Ok(())
    } else {
        Err(ServiceError::Processing(
            "voice cloning is not available with the loaded model".to_string(),
        ))
    }
}

/// Derive a state from a prompt file on a blocking worker.  The prompt is
/// dropped (and deleted) on that worker once the engine is done with it,
/// whether it succeeded, failed or panicked.
async fn from_prompt(
    model: &Arc<dyn SpeechModel>,
    prompt: PromptFile,
) -> Result<VoiceState, ServiceError> {
    let model = Arc::clone(model);
    let state = tokio::task::spawn_blocking(move || {
        let source = VoiceSource::File(prompt.path().to_path_buf());
        let state = model.state_for_voice(&source, true);
        drop(prompt);
        state
    })
    .await
    .map_err(|e| ServiceError::Processing(format!("voice task failed: {e}")))?
    .map_err(|e| {
        warn!("Error creating state from audio: {e:#}");
        ServiceError::Processing(format!("{e:#}"))
    })?;
    info!("Successfully created model state from audio file");
    Ok(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
