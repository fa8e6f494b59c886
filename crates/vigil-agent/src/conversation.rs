//! Per-conversation state: message history, outbound chunk buffer,
//! cancellation, usage counters, and loop-detection state.

use crate::events::StreamChunk;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vigil_ai::Message;

/// Default bound on retained history messages
pub const MAX_HISTORY_MESSAGES: usize = 10;

/// Lifecycle of a conversation. `Streaming` is the only non-terminal state
/// and no terminal state ever returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Streaming,
    Completed,
    Error,
    Aborted,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Consecutive-failure tracking for loop detection
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub last_failing_tool: Option<String>,
    pub consecutive_failures: u32,
}

/// What a consumer poll returns: the drained chunks plus a status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ConversationUpdate {
    pub chunks: Vec<StreamChunk>,
    pub status: ConversationStatus,
    pub full_text: String,
}

/// One conversation record, exclusively owned by the orchestrator registry
pub struct Conversation {
    pub id: String,
    /// Browsing context the tools act upon, captured at start
    pub target_id: String,
    status: ConversationStatus,
    pub messages: Vec<Message>,
    chunks: Vec<StreamChunk>,
    pub cancel: CancellationToken,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub loop_state: LoopState,
    full_text: String,
    /// Whether an agent loop currently owns this record
    pub(crate) loop_active: bool,
}

impl Conversation {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            status: ConversationStatus::Streaming,
            messages: Vec::new(),
            chunks: Vec::new(),
            cancel: CancellationToken::new(),
            tokens_in: 0,
            tokens_out: 0,
            loop_state: LoopState::default(),
            full_text: String::new(),
            loop_active: false,
        }
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    /// Accumulated assistant text across all turns
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Buffer an outbound chunk. Ignored once the conversation is terminal;
    /// the single terminal chunk goes through `finish`/`fail` instead.
    pub fn append_chunk(&mut self, chunk: StreamChunk) {
        if self.status.is_terminal() {
            tracing::warn!(id = %self.id, "dropping chunk for terminal conversation");
            return;
        }
        if let StreamChunk::TextDelta { text } = &chunk {
            self.full_text.push_str(text);
        }
        self.chunks.push(chunk);
    }

    /// Drain the chunk buffer in one observable step
    pub fn drain_chunks(&mut self) -> Vec<StreamChunk> {
        std::mem::take(&mut self.chunks)
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop whole oldest messages until at most `max` remain. Tool results
    /// live inside the assistant message that requested them, so dropping a
    /// whole message can never orphan a tool_use/tool_result pair.
    pub fn trim_history(&mut self, max: usize) {
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            tracing::debug!(id = %self.id, dropped = excess, "trimming history");
            self.messages.drain(..excess);
        }
    }

    /// Transition to `completed`, emitting the terminal finish chunk
    pub fn finish(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.chunks.push(StreamChunk::Finish);
        self.status = ConversationStatus::Completed;
    }

    /// Transition to `error`, emitting one terminal error chunk. A trailing
    /// unprocessed user message is removed so resubmission does not double it.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        if matches!(self.messages.last(), Some(m) if m.is_user()) {
            self.messages.pop();
        }
        self.chunks.push(StreamChunk::Error {
            message: message.into(),
        });
        self.status = ConversationStatus::Error;
    }

    /// Transition to `aborted`. No chunk is emitted; cancellation is not an
    /// error.
    pub fn mark_aborted(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ConversationStatus::Aborted;
    }
}
