//! Error types for vigil-exec

use thiserror::Error;

/// Ways a pending execution can fail. Display strings are the taxonomy names
/// surfaced to the model inside structured tool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// No result arrived within the execution deadline
    #[error("ExecutionTimeout")]
    Timeout,

    /// The conversation was cancelled while the execution was pending
    #[error("ExecutionCancelled")]
    Cancelled,

    /// The browsing context went away before a result arrived
    #[error("TargetClosed")]
    TargetClosed,

    /// The runner executed the script and reported a failure
    #[error("{0}")]
    Script(String),
}
