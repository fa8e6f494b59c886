//! vigil-agent: conversation orchestrator and tool executor
//!
//! The agent loop drives a streaming model client, dispatches the tool calls
//! it requests against the captured-traffic cache and the script execution
//! queue, and buffers outbound chunks for a polling consumer.

pub mod conversation;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod tool;
pub mod tools;

pub use conversation::{
    Conversation, ConversationStatus, ConversationUpdate, LoopState, MAX_HISTORY_MESSAGES,
};
pub use error::{Error, Result};
pub use events::StreamChunk;
pub use orchestrator::{Orchestrator, OrchestratorConfig, DEFAULT_SYSTEM_PROMPT, MAX_TURNS};
pub use tool::{BoxedTool, Tool, ToolOutcome, ToolRegistry};
