//! Deterministic stand-in engine for tests.
//!
//! Produces one chunk of seeded noise per word, records what it was asked to
//! do, and behaves like a real engine around prompt files: it reads them while
//! deriving a state and leaves a `<stem>.trunc.wav` copy behind when asked to
//! truncate.

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::model::{ChunkStream, GenerationOptions, SpeechModel, VoiceSource, VoiceState};

pub const FAKE_SAMPLE_RATE: u32 = 24_000;

/// Same names the Pocket TTS registry ships.
pub const FAKE_VOICES: &[&str] =
    &["alba", "marius", "javert", "jean", "fantine", "cosette", "eponine", "azelma"];

const SAMPLES_PER_CHUNK: usize = 480;
const DEFAULT_TEMPERATURE: f32 = 0.7;

type ChunkHook = Box<dyn Fn(usize) + Send + Sync>;

/// Counts a stream as open until it is dropped.
struct OpenStream(Arc<AtomicUsize>);

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeVoice {
    fingerprint: u64,
}

/// FNV-1a, enough to give every voice its own noise.
fn fingerprint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, &b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

pub struct FakeSpeechModel {
    voice_cloning: bool,
    chunk_hook: Option<ChunkHook>,
    fail_at: Option<usize>,
    produced: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
    peak_streams: AtomicUsize,
    state_calls: AtomicUsize,
    seen_files: Mutex<Vec<PathBuf>>,
    last_options: Mutex<Option<GenerationOptions>>,
}

impl Default for FakeSpeechModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSpeechModel {
    pub fn new() -> Self {
        Self {
            voice_cloning: true,
            chunk_hook: None,
            fail_at: None,
            produced: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
            peak_streams: AtomicUsize::new(0),
            state_calls: AtomicUsize::new(0),
            seen_files: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
        }
    }

    pub fn without_voice_cloning(mut self) -> Self {
        self.voice_cloning = false;
        self
    }

    /// Call `hook(index)` on the worker thread right after chunk `index` of a
    /// stream has been synthesised.
    pub fn on_chunk(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.chunk_hook = Some(Box::new(hook));
        self
    }

    /// Fail with an engine error when chunk `index` is pulled.
    pub fn failing_at_chunk(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Chunks synthesised so far, across all streams.
    pub fn chunks_produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// Most chunk streams that were ever open at the same time.
    pub fn peak_concurrent_streams(&self) -> usize {
        self.peak_streams.load(Ordering::SeqCst)
    }

    /// Calls to `state_for_voice`, successful or not.
    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    /// Prompt files handed to `state_for_voice`, in call order.
    pub fn seen_files(&self) -> Vec<PathBuf> {
        self.seen_files.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_options(&self) -> Option<GenerationOptions> {
        *self.last_options.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpeechModel for FakeSpeechModel {
    fn sample_rate(&self) -> u32 {
        FAKE_SAMPLE_RATE
    }

    fn has_voice_cloning(&self) -> bool {
        self.voice_cloning
    }

    fn voices(&self) -> Vec<String> {
        FAKE_VOICES.iter().map(|v| v.to_string()).collect()
    }

    fn state_for_voice(&self, source: &VoiceSource, truncate: bool) -> Result<VoiceState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        match source {
            VoiceSource::Predefined(name) => {
                if !FAKE_VOICES.contains(&name.as_str()) {
                    bail!("Unknown predefined voice '{}'", name);
                }
                Ok(VoiceState::new(name.clone(), FakeVoice { fingerprint: fingerprint(name.as_bytes()) }))
            }
            VoiceSource::File(path) => {
                self.seen_files
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(path.clone());
                if !self.voice_cloning {
                    bail!("This model does not support voice cloning");
                }
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Cannot read prompt {}", path.display()))?;
                hound::WavReader::new(Cursor::new(&bytes))
                    .with_context(|| format!("Cannot decode prompt {}", path.display()))?;
                if truncate {
                    std::fs::write(path.with_extension("trunc.wav"), &bytes)
                        .context("Cannot write truncated prompt")?;
                }
                Ok(VoiceState::new(
                    path.display().to_string(),
                    FakeVoice { fingerprint: fingerprint(&bytes) },
                ))
            }
        }
    }

    fn generate_audio_stream(
        &self,
        voice: VoiceState,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<ChunkStream<'_>> {
        *self.last_options.lock().unwrap_or_else(PoisonError::into_inner) = Some(*options);

        let voice: FakeVoice = voice.downcast()?;
        let seed: i64 = options.seed.unwrap_or_else(|| rand::rng().random());
        let amplitude = options.temperature.unwrap_or(DEFAULT_TEMPERATURE).clamp(0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(seed as u64 ^ voice.fingerprint);

        let open = self.open_streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_streams.fetch_max(open, Ordering::SeqCst);
        let stream = OpenStream(self.open_streams.clone());

        let words: Vec<String> = text.split_whitespace().map(str::to_owned).collect();
        Ok(Box::new(words.into_iter().enumerate().map(move |(index, _word)| {
            let _open = &stream;
            if self.fail_at == Some(index) {
                bail!("Synthetic engine failure at chunk {}", index);
            }
            let chunk: Vec<f32> = (0..SAMPLES_PER_CHUNK)
                .map(|_| rng.random_range(-1.0f32..1.0) * amplitude)
                .collect();
            self.produced.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.chunk_hook {
                hook(index);
            }
            Ok(chunk)
        })))
    }
}

/// A short mono 16-bit sine WAV, as a browser would upload it.
pub fn wav_bytes(sample_rate: u32, samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .expect("in-memory WAV writer");
        for i in 0..samples {
            let t = i as f32 / sample_rate as f32;
            let s = (t * 220.0 * std::f32::consts::TAU).sin() * 0.3;
            writer.write_sample((s * i16::MAX as f32) as i16).expect("in-memory WAV write");
        }
        writer.finalize().expect("in-memory WAV finalise");
    }
    bytes
}
