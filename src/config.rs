//! Server configuration: command line with environment fallbacks.

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::voices::{DEFAULT_VOICE, DOWNLOAD_TIMEOUT};

/// Pocket TTS web server: local text-to-speech with voice cloning
#[derive(Debug, Clone, Parser)]
#[command(name = "pocket-tts-web", version, about)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "POCKET_TTS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "POCKET_TTS_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Directory holding local model files (config.json, weights, tokenizer,
    /// voices, embeddings/)
    #[arg(long, env = "POCKET_TTS_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Directory served at `/` and `/static` (the browser UI)
    #[arg(long, env = "POCKET_TTS_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// HuggingFace repository to fetch model files from when they are not
    /// present in --models-dir
    #[arg(long, env = "POCKET_TTS_REPO")]
    pub repo: Option<String>,

    /// Voice used when a request names none
    #[arg(long, env = "POCKET_TTS_DEFAULT_VOICE", default_value = DEFAULT_VOICE)]
    pub default_voice: String,

    /// Timeout for downloading a voice prompt from a URL, in seconds
    #[arg(
        long = "download-timeout",
        env = "POCKET_TTS_DOWNLOAD_TIMEOUT",
        value_name = "SECS",
        default_value_t = DOWNLOAD_TIMEOUT.as_secs()
    )]
    pub download_timeout_secs: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
