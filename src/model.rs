//! Model Service seam: what the HTTP front-end needs from a speech engine.
//!
//! The engine itself (text conditioning, flow decoder, audio codec) is opaque
//! to this crate.  Everything the request pipeline does goes through
//! [`SpeechModel`]:
//!
//! | Call                      | Purpose                                        |
//! |---------------------------|------------------------------------------------|
//! | `state_for_voice`         | predefined name or prompt file → [`VoiceState`] |
//! | `generate_audio_stream`   | text + state → lazy sequence of PCM chunks     |
//! | `sample_rate`             | rate of every produced chunk                   |
//! | `has_voice_cloning`       | whether file prompts are accepted              |
//! | `voices`                  | predefined voice registry                      |
//!
//! The loaded engine lives in a [`ModelSlot`]: filled once at startup, never
//! reloaded.

use std::{any::Any, fmt, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Result};
use once_cell::sync::OnceCell;

/// One unit of mono PCM audio, samples nominally in `[-1.0, 1.0]`.
pub type PcmChunk = Vec<f32>;

/// Finite, non-restartable sequence of PCM chunks produced by the engine.
///
/// Chunks are synthesised lazily: pulling the next item runs the engine for
/// that chunk.  Calling [`SpeechModel::generate_audio_stream`] again yields a
/// fresh sequence.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<PcmChunk>> + 'a>;

// ─────────────────────────────────────────────────────────────────────────────
// Voice state
// ─────────────────────────────────────────────────────────────────────────────

/// Where a voice comes from, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSource {
    /// A voice from the engine's predefined registry.
    Predefined(String),
    /// An audio prompt on disk (uploaded or downloaded for one request).
    File(PathBuf),
}

impl fmt::Display for VoiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predefined(name) => write!(f, "voice '{name}'"),
            Self::File(path) => write!(f, "prompt {}", path.display()),
        }
    }
}

/// Engine-specific speaker conditioning derived from a [`VoiceSource`].
///
/// Opaque to the pipeline: the engine that built it is the only one that can
/// look inside.  Owned by the request that resolved it and consumed by exactly
/// one generation call.
pub struct VoiceState {
    label: String,
    inner: Box<dyn Any + Send>,
}

impl VoiceState {
    pub fn new<T: Any + Send>(label: impl Into<String>, state: T) -> Self {
        Self { label: label.into(), inner: Box::new(state) }
    }

    /// Human-readable origin, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Recover the engine's concrete state.
    pub fn downcast<T: Any>(self) -> Result<T> {
        let label = self.label;
        self.inner
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| anyhow!("Voice state for '{}' was built by a different engine", label))
    }
}

impl fmt::Debug for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceState").field("label", &self.label).finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation options
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request overrides.  `None` means "use the engine's own default" and is
/// never collapsed to a sentinel value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    /// Fixes the engine's sampling noise; identical seed + text + voice gives
    /// identical audio.
    /// Any 64-bit integer, negative values included.
    pub seed: Option<i64>,
    pub temperature: Option<f32>,
    /// Flow-decoder steps per frame (`lsd_steps` on the wire).
    pub decode_steps: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SpeechModel
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded speech engine.
///
/// Implementations are shared process-wide behind an `Arc` and called from
/// blocking worker threads, never from the async request loop.
pub trait SpeechModel: Send + Sync {
    /// Sample rate of every chunk this engine produces.
    fn sample_rate(&self) -> u32;

    /// Whether [`VoiceSource::File`] prompts are supported.
    fn has_voice_cloning(&self) -> bool;

    /// Names of the predefined voices, in display order.
    fn voices(&self) -> Vec<String>;

    /// Derive speaker conditioning from a voice source.
    ///
    /// `truncate` limits how much of a prompt file is used.  Predefined voices
    /// are cached by the engine; callers must not add their own cache.
    fn state_for_voice(&self, source: &VoiceSource, truncate: bool) -> Result<VoiceState>;

    /// Start synthesising `text` with `voice`.  Consumes the voice state.
    fn generate_audio_stream(
        &self,
        voice: VoiceState,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<ChunkStream<'_>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelSlot
// ─────────────────────────────────────────────────────────────────────────────

/// Process-scoped holder for the loaded engine.
///
/// Empty until startup loading finishes; filled at most once.  A failed load
/// leaves it empty for the life of the process, there is no reload path.
#[derive(Clone, Default)]
pub struct ModelSlot(Arc<OnceCell<Arc<dyn SpeechModel>>>);

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that starts out loaded.
    pub fn loaded(model: Arc<dyn SpeechModel>) -> Self {
        let slot = Self::new();
        // Fresh cell, cannot already be set.
        let _ = slot.0.set(model);
        slot
    }

    pub fn install(&self, model: Arc<dyn SpeechModel>) -> Result<()> {
        if self.0.set(model).is_err() {
            bail!("A model is already loaded; runtime reload is not supported");
        }
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn SpeechModel>> {
        self.0.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.0.get().is_some()
    }
}

impl fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSlot").field("loaded", &self.is_loaded()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
