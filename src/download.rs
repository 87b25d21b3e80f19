//! Model file resolution: local models directory first, HuggingFace Hub second.
//!
//! `config.json` names every file the engine needs.  Each one is taken from
//! the local models directory when present there (the offline setup), and
//! otherwise fetched into the Hub cache from the configured repository.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use hf_hub::api::sync::Api;
use serde::Deserialize;
use tracing::{info, warn};

use crate::npz::{load_npy, NpyArray};

const CONFIG_FILE: &str = "config.json";
const EMBEDDINGS_DIR: &str = "embeddings";

// ─────────────────────────────────────────────────────────────────────────────
// config.json schema
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialised `config.json` of an exported Pocket TTS model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Filename of the synthesis ONNX graph (e.g. `"tts.onnx"`).
    pub model_file: String,

    /// Filename of the tokenizer (e.g. `"tokenizer.json"`).
    pub tokenizer: String,

    /// Filename of the predefined voices NPZ archive (e.g. `"voices.npz"`).
    pub voices: String,

    /// Filename of the prompt encoder graph.  Without it the model cannot
    /// clone voices.
    #[serde(default)]
    pub voice_encoder: Option<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Sampling temperature used when a request does not set one.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Flow-decoder steps used when a request does not set them.
    #[serde(default = "default_decode_steps")]
    pub decode_steps: u32,

    /// Length a voice prompt is cut to when truncation is requested.
    #[serde(default = "default_max_prompt_seconds")]
    pub max_prompt_seconds: f32,
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_decode_steps() -> u32 {
    1
}

fn default_max_prompt_seconds() -> f32 {
    30.0
}

/// Every file the engine loads, resolved to a local path.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: ModelConfig,
    pub model: PathBuf,
    pub tokenizer: PathBuf,
    pub voices: PathBuf,
    pub voice_encoder: Option<PathBuf>,
    /// Local `embeddings/` directory; may not exist.
    pub embeddings_dir: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Download helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Download a single file from a HuggingFace repository.
fn hf_download(api: &Api, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let repo = api.model(repo_id.to_string());
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

/// Local directory with an optional Hub repository behind it.
struct FileSource<'a> {
    models_dir: &'a Path,
    repo_id: Option<&'a str>,
    api: Option<Api>,
}

impl<'a> FileSource<'a> {
    fn new(models_dir: &'a Path, repo_id: Option<&'a str>) -> Self {
        Self { models_dir, repo_id, api: None }
    }

    fn fetch(&mut self, filename: &str) -> Result<PathBuf> {
        let local = self.models_dir.join(filename);
        if local.is_file() {
            info!("Found local {}: {}", filename, local.display());
            return Ok(local);
        }
        let Some(repo_id) = self.repo_id else {
            bail!(
                "'{}' not found in {} and no remote repository is configured",
                filename,
                self.models_dir.display()
            );
        };
        info!("Local {} not found at {}, downloading from {}…", filename, local.display(), repo_id);
        let api = match self.api.take() {
            Some(api) => api,
            None => Api::new().context("Failed to initialise HuggingFace Hub client")?,
        };
        let path = hf_download(&api, repo_id, filename);
        self.api = Some(api);
        path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve `config.json` and every file it names.
///
/// A missing voice encoder is not fatal: the model then runs without voice
/// cloning.
pub fn resolve_model_files(models_dir: &Path, repo_id: Option<&str>) -> Result<ModelFiles> {
    let mut source = FileSource::new(models_dir, repo_id);

    let config_path = source.fetch(CONFIG_FILE)?;
    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
    let config: ModelConfig =
        serde_json::from_slice(&config_bytes).context("Failed to parse config.json")?;

    let model = source.fetch(&config.model_file)?;
    let tokenizer = source.fetch(&config.tokenizer)?;
    let voices = source.fetch(&config.voices)?;

    let voice_encoder = match &config.voice_encoder {
        Some(name) => match source.fetch(name) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Voice encoder unavailable, voice cloning disabled: {e:#}");
                None
            }
        },
        None => None,
    };

    Ok(ModelFiles {
        config,
        model,
        tokenizer,
        voices,
        voice_encoder,
        embeddings_dir: models_dir.join(EMBEDDINGS_DIR),
    })
}

/// Load `<dir>/<name>.npy` voice embeddings that override or extend the
/// predefined registry.  A missing directory yields no overrides.
pub fn load_voice_overrides(dir: &Path) -> Result<BTreeMap<String, NpyArray>> {
    let mut overrides = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(overrides);
    }
    info!("Checking for local voices in {}", dir.display());

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot list voice embeddings in {}", dir.display()))?;
    for entry in entries {
        let path = entry.context("Cannot read embeddings directory entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("npy") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let array = load_npy(&path)?;
        overrides.insert(name.to_string(), array);
    }
    if !overrides.is_empty() {
        info!("Updated {} voices to use local files", overrides.len());
    }
    Ok(overrides)
}
