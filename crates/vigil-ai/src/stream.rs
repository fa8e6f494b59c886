//! Typed protocol events decoded from the model's SSE stream

use crate::error::Result;
use crate::types::StopReason;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// What kind of content block opened at a given index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// One typed event from the model stream, in wire order.
///
/// Tool-call arguments arrive as JSON fragments; the client buffers them per
/// block index and parses once at block stop, emitting either `ToolUse` or
/// `ToolArgsParseError` ahead of the `BlockStop` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Input-token usage reported at message start
    UsageStart { tokens_in: u64 },
    /// A content block opened
    BlockStart { index: usize, kind: BlockKind },
    /// Text appended to the currently open text block
    TextDelta { text: String },
    /// A JSON fragment appended to a tool_use block's argument buffer
    ToolArgsDelta { index: usize, fragment: String },
    /// A tool_use block closed with arguments that parsed as JSON
    ToolUse {
        index: usize,
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool_use block closed but its buffered arguments never became valid JSON
    ToolArgsParseError {
        index: usize,
        name: String,
        error: String,
    },
    /// A content block closed
    BlockStop { index: usize },
    /// Output-token usage reported in the message delta
    Usage { tokens_out: u64 },
    /// The model's stop reason
    StopReason { reason: StopReason },
    /// End of the message
    MessageStop,
}

/// A stream of protocol events; transport failures surface as `Err` items
pub type ProtocolEventStream = Pin<Box<dyn Stream<Item = Result<ProtocolEvent>> + Send>>;
