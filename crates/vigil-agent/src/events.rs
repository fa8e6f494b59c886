//! Outbound chunk types drained by the consuming UI

use serde::{Deserialize, Serialize};

/// One buffered outbound event.
///
/// A conversation emits at most one terminal chunk: `Finish` on completion,
/// `Error` on a fatal failure. Aborts emit nothing; the consumer sees only
/// the status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Text appended to the assistant's answer
    TextDelta { text: String },

    /// The model requested a tool call
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// A tool call finished
    ToolResult {
        id: String,
        name: String,
        result: serde_json::Value,
    },

    /// Something went wrong; fatal only when accompanied by the error status
    Error { message: String },

    /// The conversation completed
    Finish,
}
