//! PCM helpers: WAV packaging for responses and prompt decoding for cloning.

use std::{io::Cursor, path::Path};

use anyhow::{bail, Context, Result};

use crate::model::PcmChunk;

/// Output container format: mono, 16-bit signed PCM.
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Convert one float sample to 16-bit PCM: clamp to `[-1, 1]`, scale by
/// 32767, round.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// A complete in-memory RIFF/WAVE file.
///
/// Only ever built from the full set of chunks, so the header's data length
/// always matches the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavBuffer {
    bytes: Vec<u8>,
    sample_rate: u32,
    samples: usize,
}

impl WavBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of mono frames in the data chunk.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples as f32 / self.sample_rate as f32
    }
}

/// Write `chunks`, in order, into a 16-bit mono WAV at `sample_rate` Hz.
pub fn encode_wav(chunks: &[PcmChunk], sample_rate: u32) -> Result<WavBuffer> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let samples: usize = chunks.iter().map(Vec::len).sum();

    let mut bytes = Vec::with_capacity(44 + samples * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .context("Cannot start WAV container")?;
        for &s in chunks.iter().flatten() {
            writer.write_sample(to_pcm16(s)).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;
    }

    Ok(WavBuffer { bytes, sample_rate, samples })
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Read a WAV voice prompt as mono `f32` at `target_rate` Hz.
///
/// Multi-channel audio is averaged down to mono and other rates are resampled
/// linearly.  When `max_seconds` is set the prompt is cut to that length.
pub fn read_prompt(path: &Path, target_rate: u32, max_seconds: Option<f32>) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Cannot read audio prompt {} (only WAV is supported)", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Corrupt float samples in prompt")?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("Corrupt PCM samples in prompt")?
        }
    };

    let mono = downmix(&interleaved, spec.channels);
    let mut audio = resample_linear(&mono, spec.sample_rate, target_rate);
    if let Some(max) = max_seconds {
        audio.truncate((max * target_rate as f32) as usize);
    }
    if audio.is_empty() {
        bail!("Audio prompt {} contains no samples", path.display());
    }
    Ok(audio)
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler.  Good enough for speaker prompts.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            input[idx] * (1.0 - frac) + input[next] * frac
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
