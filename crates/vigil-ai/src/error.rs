//! Error types for vigil-ai

use thiserror::Error;

/// Result type alias using vigil-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving the model endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The model endpoint answered with a non-2xx status
    #[error("model endpoint returned {status}: {body}")]
    ModelHttp { status: u16, body: String },

    /// IO or decode failure in the middle of the event stream
    #[error("model stream transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing API key
    #[error("invalid or missing API key")]
    InvalidApiKey,
}

impl Error {
    /// Whether a fresh request may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Transport(_) => true,
            Error::ModelHttp { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
