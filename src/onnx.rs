//! ONNX Runtime backend for exported Pocket TTS models.
//!
//! Uses [`ort`] for inference and [`tokenizers`] for the SentencePiece
//! vocabulary.  The synthesis graph takes positional inputs:
//!
//! | Input          | Shape                | dtype   |
//! |----------------|----------------------|---------|
//! | `input_ids`    | `[1, seq_len]`       | int64   |
//! | `voice`        | `[1, frames, dim]`   | float32 |
//! | `temperature`  | `[1]`                | float32 |
//! | `decode_steps` | `[1]`                | int64   |
//! | `seed`         | `[1]`                | int64   |
//!
//! and returns the waveform as output 0.  The optional voice encoder maps a
//! prompt `audio [1, samples]` to a `[1, frames, dim]` embedding.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Mutex, PoisonError},
};

use anyhow::{anyhow, bail, Context, Result};
use ort::{session::Session, value::Tensor};
use rand::Rng;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    audio::read_prompt,
    download::{load_voice_overrides, resolve_model_files, ModelConfig, ModelFiles},
    model::{ChunkStream, GenerationOptions, PcmChunk, SpeechModel, VoiceSource, VoiceState},
    npz::{load_npz, NpyArray},
    text::{chunk_text, prepare_chunk, CHUNK_MAX_CHARS},
};

/// Speaker conditioning: `frames` rows of `dim` floats.
struct Conditioning {
    embedding: NpyArray,
}

impl Conditioning {
    fn tensor(&self) -> Result<Tensor<f32>> {
        let dim = self.embedding.dim();
        let frames = self.embedding.frames();
        Tensor::<f32>::from_array(([1usize, frames, dim], self.embedding.data.clone()))
            .context("Failed to build voice tensor")
    }
}

fn open_session(path: &Path) -> Result<Session> {
    Session::builder()
        .context("Failed to create ORT session builder")?
        .commit_from_file(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))
}

/// A Pocket TTS model running on ONNX Runtime.
pub struct OnnxSpeechModel {
    config: ModelConfig,
    session: Mutex<Session>,
    encoder: Option<Mutex<Session>>,
    tokenizer: Tokenizer,
    voices: BTreeMap<String, NpyArray>,
}

impl OnnxSpeechModel {
    /// Load every file in `files`.  Local `embeddings/<name>.npy` files
    /// replace or extend the packaged voices.
    pub fn load(files: &ModelFiles) -> Result<Self> {
        let session = open_session(&files.model)?;
        let encoder = files.voice_encoder.as_deref().map(open_session).transpose()?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            anyhow!("Cannot load tokenizer {}: {}", files.tokenizer.display(), e)
        })?;

        let mut voices = load_npz(&files.voices)
            .with_context(|| format!("Cannot load voices: {}", files.voices.display()))?;
        voices.extend(load_voice_overrides(&files.embeddings_dir)?);
        if voices.is_empty() {
            bail!("No voices found in {}", files.voices.display());
        }

        info!(
            "Loaded {} voices at {} Hz (voice cloning: {})",
            voices.len(),
            files.config.sample_rate,
            encoder.is_some()
        );

        Ok(Self {
            config: files.config.clone(),
            session: Mutex::new(session),
            encoder: encoder.map(Mutex::new),
            tokenizer,
            voices,
        })
    }

    /// Resolve the model files under `models_dir` (falling back to `repo_id`)
    /// and load them.
    pub fn from_dir(models_dir: &Path, repo_id: Option<&str>) -> Result<Self> {
        Self::load(&resolve_model_files(models_dir, repo_id)?)
    }

    fn encode_prompt(&self, path: &Path, truncate: bool) -> Result<NpyArray> {
        let Some(encoder) = &self.encoder else {
            bail!("This model does not support voice cloning");
        };
        let max_seconds = truncate.then_some(self.config.max_prompt_seconds);
        let audio = read_prompt(path, self.config.sample_rate, max_seconds)?;
        debug!("Encoding {} prompt samples from {}", audio.len(), path.display());

        let t_audio = Tensor::<f32>::from_array(([1usize, audio.len()], audio))
            .context("Failed to build prompt tensor")?;

        let mut encoder = encoder.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = encoder
            .run(ort::inputs![t_audio])
            .context("Voice encoder inference failed")?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract voice embedding")?;

        let shape: Vec<usize> = shape.iter().map(|&d| d.max(1) as usize).collect();
        Ok(NpyArray { shape, data: data.to_vec() })
    }

    /// Synthesise one prepared chunk.
    fn infer(
        &self,
        voice: &Conditioning,
        chunk: &str,
        temperature: f32,
        decode_steps: u32,
        seed: i64,
    ) -> Result<PcmChunk> {
        let encoding = self
            .tokenizer
            .encode(prepare_chunk(chunk), false)
            .map_err(|e| anyhow!("Tokenization failed for {:?}: {}", chunk, e))?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let seq_len = ids.len();

        let t_input_ids = Tensor::<i64>::from_array(([1usize, seq_len], ids))
            .context("Failed to build input_ids tensor")?;
        let t_voice = voice.tensor()?;
        let t_temperature = Tensor::<f32>::from_array(([1usize], vec![temperature]))
            .context("Failed to build temperature tensor")?;
        let t_steps = Tensor::<i64>::from_array(([1usize], vec![decode_steps as i64]))
            .context("Failed to build decode_steps tensor")?;
        let t_seed = Tensor::<i64>::from_array(([1usize], vec![seed]))
            .context("Failed to build seed tensor")?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![t_input_ids, t_voice, t_temperature, t_steps, t_seed])
            .context("ONNX inference failed")?;
        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract audio tensor")?;
        Ok(audio.to_vec())
    }
}

impl SpeechModel for OnnxSpeechModel {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn has_voice_cloning(&self) -> bool {
        self.encoder.is_some()
    }

    fn voices(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    fn state_for_voice(&self, source: &VoiceSource, truncate: bool) -> Result<VoiceState> {
        let embedding = match source {
            VoiceSource::Predefined(name) => self
                .voices
                .get(name)
                .cloned()
                .with_context(|| format!("Unknown predefined voice '{}'", name))?,
            VoiceSource::File(path) => self.encode_prompt(path, truncate)?,
        };
        Ok(VoiceState::new(source.to_string(), Conditioning { embedding }))
    }

    fn generate_audio_stream(
        &self,
        voice: VoiceState,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<ChunkStream<'_>> {
        let voice: Conditioning = voice.downcast()?;
        let seed: i64 = options.seed.unwrap_or_else(|| rand::rng().random());
        let temperature = options.temperature.unwrap_or(self.config.temperature);
        let decode_steps = options.decode_steps.unwrap_or(self.config.decode_steps);

        let chunks = chunk_text(text, CHUNK_MAX_CHARS);
        debug!("Synthesising {} chunks (temperature {}, steps {})", chunks.len(), temperature, decode_steps);

        Ok(Box::new(chunks.into_iter().enumerate().map(move |(i, chunk)| {
            self.infer(&voice, &chunk, temperature, decode_steps, seed.wrapping_add(i as i64))
        })))
    }
}
