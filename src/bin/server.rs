//! `pocket-tts-web` server binary.
//!
//! ```text
//! pocket-tts-web --models-dir models --static-dir static --port 8000
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `pocket_tts_web=info,tower_http=info`).

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pocket_tts_web::{onnx::OnnxSpeechModel, serve, ServerConfig, SpeechModel};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pocket_tts_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    info!("Models directory: {}", config.models_dir.display());
    match &config.repo {
        Some(repo) => info!("Missing model files are fetched from {}", repo),
        None => info!("Offline mode: every model file must be in the models directory"),
    }

    let models_dir = config.models_dir.clone();
    let repo = config.repo.clone();
    serve(config, move || {
        let model = OnnxSpeechModel::from_dir(&models_dir, repo.as_deref())?;
        Ok(Arc::new(model) as Arc<dyn SpeechModel>)
    })
    .await
}
