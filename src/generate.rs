//! Generation Coordinator. Runs one synthesis off the request loop and
//! packages the result as a complete WAV file.
//!
//! The engine's chunk sequence is drained eagerly on a blocking worker.  The
//! cancellation token is checked at every chunk boundary; a cancelled run ends
//! as [`Outcome::Aborted`], which is a normal terminal state, not an error.
//! Only after the sequence is exhausted is the WAV container written, so its
//! header always declares the right duration.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use anyhow::anyhow;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    audio::{encode_wav, WavBuffer},
    error::ServiceError,
    model::{GenerationOptions, ModelSlot, SpeechModel, VoiceState},
    voices::VoiceSelector,
};

/// Characters of the request text echoed to the log.
const LOG_PREVIEW_CHARS: usize = 20;

/// One `/api/generate` request after form decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// Text to speak; never empty.
    pub text: String,
    pub voice: VoiceSelector,
    pub options: GenerationOptions,
}

/// How a generation ended.
#[derive(Debug)]
pub enum Outcome {
    Completed(WavBuffer),
    /// Stopped by the client.  `chunks` were accepted before the stop was seen
    /// and are discarded.
    Aborted { chunks: usize },
}

impl Outcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// Synthesise `request.text` with `voice` and package it as WAV.
///
/// Blocks for the whole synthesis.  Call through [`dispatch`] from async code.
pub fn generate(
    model: &dyn SpeechModel,
    voice: VoiceState,
    request: &GenerationRequest,
    cancel: &CancellationToken,
) -> Result<Outcome, ServiceError> {
    if let Some(seed) = request.options.seed {
        info!("Setting seed to: {}", seed);
    }
    info!("Generating for: {}... (voice: {})", preview(&request.text), voice.label());

    let mut stream = model
        .generate_audio_stream(voice, &request.text, &request.options)
        .map_err(ServiceError::Generation)?;

    let mut chunks = Vec::new();
    let mut aborted = false;
    loop {
        if cancel.is_cancelled() {
            aborted = true;
            break;
        }
        let Some(chunk) = stream.next() else {
            break;
        };
        let chunk = chunk.map_err(ServiceError::Generation)?;
        // The stop may have arrived while this chunk was being produced.
        if cancel.is_cancelled() {
            aborted = true;
            break;
        }
        chunks.push(chunk);
    }
    drop(stream);

    if aborted {
        info!("Generation aborted by user after {} chunks", chunks.len());
        return Ok(Outcome::Aborted { chunks: chunks.len() });
    }

    info!("Generated {} chunks.", chunks.len());
    let wav = encode_wav(&chunks, model.sample_rate()).map_err(ServiceError::Generation)?;
    info!(
        "Generation and write complete: {} samples ({:.2} s)",
        wav.samples(),
        wav.duration_secs()
    );
    Ok(Outcome::Completed(wav))
}

/// Run [`generate`] on the blocking pool and await its result.
///
/// The request loop stays free (for `/api/stop` in particular) while the
/// engine works.  `turn` is held by the worker until the engine is done, so it
/// outlives a caller that stops waiting.  Fails with
/// [`ServiceError::ModelUnavailable`] when nothing is loaded.
pub async fn dispatch(
    slot: &ModelSlot,
    voice: VoiceState,
    request: GenerationRequest,
    cancel: CancellationToken,
    turn: OwnedMutexGuard<()>,
) -> Result<Outcome, ServiceError> {
    let model = slot.get().ok_or(ServiceError::ModelUnavailable)?;
    tokio::task::spawn_blocking(move || {
        let _turn = turn;
        generate(model.as_ref(), voice, &request, &cancel)
    })
    .await
    .map_err(|e| ServiceError::Generation(anyhow!("generation task failed: {e}")))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Abort bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

/// Cancellation tokens of every `/api/generate` request in flight.
///
/// A request registers on arrival, so `/api/stop` reaches it while its voice
/// is being resolved, while it queues for the engine, and while it generates.
#[derive(Debug, Default)]
pub struct AbortHandle {
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<u64, CancellationToken>>,
}

/// One request's entry in an [`AbortHandle`].
///
/// Dropping it cancels the token and unregisters it, so a request whose
/// handler goes away (client disconnect) stops its generation at the next
/// chunk boundary.
#[derive(Debug)]
pub struct Registration<'a> {
    handle: &'a AbortHandle,
    id: u64,
    token: CancellationToken,
}

impl Registration<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a newly arrived request a fresh token.
    pub fn register(&self) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());
        Registration { handle: self, id, token }
    }

    /// Cancel every request in flight.  Returns how many there were.
    pub fn stop(&self) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for token in in_flight.values() {
            token.cancel();
        }
        in_flight.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
