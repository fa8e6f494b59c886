//! Error types for vigil-agent

use thiserror::Error;

/// Result type alias using vigil-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal agent-loop failures. Recoverable tool errors never reach this type;
/// they flow back to the model as error tool results.
#[derive(Error, Debug)]
pub enum Error {
    /// The model client failed (HTTP, transport, decode)
    #[error(transparent)]
    Model(#[from] vigil_ai::Error),

    /// The model kept misusing the same tool
    #[error("model is repeatedly misusing tool {0}")]
    LoopDetected(String),

    /// The agent loop ran past its turn cap
    #[error("conversation exceeded the {0}-turn cap")]
    TurnCapExceeded(u32),

    /// The conversation was cancelled; not surfaced as an error chunk
    #[error("conversation aborted")]
    Aborted,
}
