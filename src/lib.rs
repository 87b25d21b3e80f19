//! # pocket-tts-web
//!
//! Local web front-end for the Pocket TTS text-to-speech model: a small HTTP
//! server that lists voices, synthesises text with a predefined or cloned
//! voice, and returns the result as one complete WAV file.
//!
//! ## Quick start
//!
//! ```no_run
//! # #[cfg(feature = "onnx")]
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use clap::Parser;
//! use pocket_tts_web::{onnx::OnnxSpeechModel, serve, ServerConfig, SpeechModel};
//!
//! let config = ServerConfig::parse();
//! let (models_dir, repo) = (config.models_dir.clone(), config.repo.clone());
//! serve(config, move || {
//!     let model = OnnxSpeechModel::from_dir(&models_dir, repo.as_deref())?;
//!     Ok(Arc::new(model) as Arc<dyn SpeechModel>)
//! })
//! .await
//! # }
//! ```
//!
//! ## Request pipeline
//! 1. **Form decoding**: text, voice selection and sampling overrides.
//! 2. **Voice resolution**: predefined name, uploaded prompt or prompt URL
//!    becomes an engine [`VoiceState`]; temporary prompt files are removed on
//!    every path.
//! 3. **Generation**: the engine's chunk sequence is drained on a blocking
//!    worker and checked for `/api/stop` between chunks.
//! 4. **Packaging**: chunks are written into one 16-bit mono WAV.
//!
//! The engine sits behind [`SpeechModel`].  The `onnx` feature provides an
//! ONNX Runtime implementation; the `test-utils` feature exposes a
//! deterministic fake for tests.

pub mod audio;
pub mod config;
pub mod download;
pub mod error;
pub mod generate;
pub mod model;
pub mod npz;
pub mod server;
pub mod text;
pub mod voices;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use config::ServerConfig;
pub use error::ServiceError;
pub use model::{GenerationOptions, ModelSlot, SpeechModel, VoiceSource, VoiceState};
pub use server::{router, serve, AppState};
