//! Request-pipeline error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Everything a generation request can fail with.
///
/// Voice-resolution failures carry a client-facing message.  Engine failures
/// keep the full error chain for the server log and show the client a generic
/// message only.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Unknown voice '{0}'")]
    InvalidVoice(String),

    #[error("Failed to download audio from URL: {0}")]
    Download(String),

    #[error("Error processing voice file: {0}")]
    Processing(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Audio generation failed")]
    Generation(anyhow::Error),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidVoice(_)
            | Self::Download(_)
            | Self::Processing(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let Self::Generation(e) = &self {
            tracing::error!("Error in generation: {e:#}");
        }
        let body = Json(ErrorBody { detail: self.to_string() });
        (self.status(), body).into_response()
    }
}
