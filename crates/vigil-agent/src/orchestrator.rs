//! The agent loop: alternate model calls and tool executions until the
//! conversation reaches a terminal state.

use crate::{
    conversation::{Conversation, ConversationUpdate, LoopState, MAX_HISTORY_MESSAGES},
    error::{Error, Result},
    events::StreamChunk,
    tool::ToolRegistry,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_ai::{
    BlockKind, ContentPart, Message, ModelRequest, ModelTransport, ProtocolEvent,
    ProtocolEventStream, RetryConfig, StopReason,
};

/// Hard cap on model-call iterations per conversation
pub const MAX_TURNS: u32 = 500;

/// Consecutive same-tool failures that terminate the conversation
const MAX_CONSECUTIVE_TOOL_FAILURES: u32 = 3;

/// System prompt shipped with the agent; overridable through the config
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a web security analyst embedded in the user's browser. \
You investigate the currently loaded page by inspecting its captured network traffic and by running \
JavaScript in the page itself. Work from evidence: list or search the captured requests, read bodies \
with the chunked reader when they are large, and use execute_javascript to probe the live page. \
Point out concrete security problems you find (credentials or tokens in transit, verbose errors, \
missing authorization, injectable parameters) and say what request or observation supports each one. \
Keep answers short and specific.";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_prompt: String,
    pub max_history_messages: usize,
    pub max_turns: u32,
    /// Maximum tokens per model response
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_messages: MAX_HISTORY_MESSAGES,
            max_turns: MAX_TURNS,
            max_tokens: 4096,
            temperature: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Process-wide registry of conversations plus the loop that drives them.
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    transport: Arc<dyn ModelTransport>,
    tools: Arc<ToolRegistry>,
    config: Arc<OrchestratorConfig>,
    conversations: Arc<Mutex<HashMap<String, Arc<Mutex<Conversation>>>>>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transport,
            tools,
            config: Arc::new(config),
            conversations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create or continue a conversation: append the user prompt and run the
    /// agent loop concurrently with the caller. Terminal conversations do
    /// not resume; a conversation already being driven ignores the start.
    pub fn start(&self, conversation_id: &str, prompt: &str, target_id: &str) {
        let conv = {
            let mut table = self.conversations.lock();
            table
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Conversation::new(conversation_id, target_id)))
                })
                .clone()
        };

        {
            let mut c = conv.lock();
            if c.status().is_terminal() {
                tracing::warn!(id = conversation_id, "ignoring start for finished conversation");
                return;
            }
            if c.loop_active {
                tracing::warn!(id = conversation_id, "ignoring start while loop is running");
                return;
            }
            c.loop_active = true;
            c.append_message(Message::user(prompt));
        }

        let this = self.clone();
        tokio::spawn(async move { this.run_loop(conv).await });
    }

    /// Drain buffered chunks and report status. Idempotent when no new
    /// events intervened.
    pub fn poll(&self, conversation_id: &str) -> Option<ConversationUpdate> {
        let conv = self.conversations.lock().get(conversation_id).cloned()?;
        let mut c = conv.lock();
        Some(ConversationUpdate {
            chunks: c.drain_chunks(),
            status: c.status(),
            full_text: c.full_text().to_string(),
        })
    }

    /// Signal cancellation; the loop observes it at its next suspension
    /// point and the status becomes `aborted`. Idempotent.
    pub fn abort(&self, conversation_id: &str) {
        if let Some(conv) = self.conversations.lock().get(conversation_id).cloned() {
            conv.lock().cancel.cancel();
        }
    }

    /// Remove the conversation record. Idempotent.
    pub fn cleanup(&self, conversation_id: &str) {
        self.conversations.lock().remove(conversation_id);
    }

    #[cfg(test)]
    pub(crate) fn conversation(&self, conversation_id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.lock().get(conversation_id).cloned()
    }

    async fn run_loop(&self, conv: Arc<Mutex<Conversation>>) {
        let result = self.drive(&conv).await;
        let mut c = conv.lock();
        c.loop_active = false;
        match result {
            Ok(()) => c.finish(),
            Err(Error::Aborted) => c.mark_aborted(),
            Err(e) => {
                tracing::error!(id = %c.id, "conversation failed: {e}");
                c.fail(e.to_string());
            }
        }
    }

    async fn drive(&self, conv: &Arc<Mutex<Conversation>>) -> Result<()> {
        let (cancel, target_id) = {
            let c = conv.lock();
            (c.cancel.clone(), c.target_id.clone())
        };

        for _ in 0..self.config.max_turns {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }

            let request = {
                let mut c = conv.lock();
                c.trim_history(self.config.max_history_messages);
                ModelRequest {
                    messages: c.messages.clone(),
                    system: self.config.system_prompt.clone(),
                    tools: self.tools.specs(),
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                }
            };

            let stream = self.open_stream(request, &cancel).await?;
            let turn = self.fold_stream(stream, conv).await?;

            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }

            let mut assistant = Message::assistant(turn.content);
            let tool_uses: Vec<(String, String, serde_json::Value)> = assistant
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if tool_uses.is_empty() {
                let mut c = conv.lock();
                if has_meaningful_content(&assistant) {
                    c.append_message(assistant);
                }
                return Ok(());
            }
            if turn.stop_reason == Some(StopReason::EndTurn) {
                tracing::warn!("model signalled end_turn alongside tool calls; dispatching them");
            }

            // Dispatch in wire order; each result becomes a tool_result part
            // of the same assistant message plus one outbound chunk
            for (id, name, input) in &tool_uses {
                if cancel.is_cancelled() {
                    return Err(Error::Aborted);
                }
                tracing::debug!(tool = %name, call = %id, "dispatching tool call");
                let outcome = self
                    .tools
                    .dispatch(name, &target_id, input.clone(), cancel.clone())
                    .await;

                let consecutive_failures = {
                    let mut c = conv.lock();
                    if outcome.is_failure() {
                        if c.loop_state.last_failing_tool.as_deref() == Some(name.as_str()) {
                            c.loop_state.consecutive_failures += 1;
                        } else {
                            c.loop_state = LoopState {
                                last_failing_tool: Some(name.clone()),
                                consecutive_failures: 1,
                            };
                        }
                    } else {
                        c.loop_state = LoopState::default();
                    }
                    c.loop_state.consecutive_failures
                };

                assistant.push_part(ContentPart::tool_result(
                    id.clone(),
                    outcome.content_str(),
                    outcome.is_error,
                ));
                conv.lock().append_chunk(StreamChunk::ToolResult {
                    id: id.clone(),
                    name: name.clone(),
                    result: outcome.payload,
                });

                if consecutive_failures >= MAX_CONSECUTIVE_TOOL_FAILURES {
                    return Err(Error::LoopDetected(name.clone()));
                }
            }

            conv.lock().append_message(assistant);
        }

        Err(Error::TurnCapExceeded(self.config.max_turns))
    }

    /// Open the model stream, retrying retryable failures with backoff.
    /// Mid-stream failures are never retried.
    async fn open_stream(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ProtocolEventStream> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            match self.transport.stream(request.clone(), cancel.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.config.retry.max_retries && e.is_retryable() => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "model request failed (attempt {}/{}): {e}; retrying in {delay:?}",
                        attempt + 1,
                        self.config.retry.max_retries + 1,
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume one model turn: buffer outbound chunks as events arrive and
    /// assemble the assistant content parts in wire order.
    async fn fold_stream(
        &self,
        mut stream: ProtocolEventStream,
        conv: &Arc<Mutex<Conversation>>,
    ) -> Result<FoldedTurn> {
        use futures::StreamExt;

        let mut parts: BTreeMap<usize, ContentPart> = BTreeMap::new();
        let mut text_buffers: BTreeMap<usize, String> = BTreeMap::new();
        let mut current_text: Option<usize> = None;
        let mut stop_reason = None;
        let mut saw_message_stop = false;

        while let Some(event) = stream.next().await {
            match event? {
                ProtocolEvent::UsageStart { tokens_in } => conv.lock().tokens_in += tokens_in,
                ProtocolEvent::Usage { tokens_out } => conv.lock().tokens_out += tokens_out,
                ProtocolEvent::BlockStart { index, kind } => {
                    if matches!(kind, BlockKind::Text) {
                        text_buffers.insert(index, String::new());
                        current_text = Some(index);
                    }
                }
                ProtocolEvent::TextDelta { text } => {
                    if let Some(index) = current_text {
                        if let Some(buffer) = text_buffers.get_mut(&index) {
                            buffer.push_str(&text);
                        }
                        conv.lock().append_chunk(StreamChunk::TextDelta { text });
                    }
                }
                // Argument reassembly happens in the client; fragments are
                // only informational here
                ProtocolEvent::ToolArgsDelta { .. } => {}
                ProtocolEvent::ToolUse {
                    index,
                    id,
                    name,
                    input,
                } => {
                    conv.lock().append_chunk(StreamChunk::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: input.clone(),
                    });
                    parts.insert(index, ContentPart::tool_use(id, name, input));
                }
                ProtocolEvent::ToolArgsParseError { index, name, error } => {
                    conv.lock().append_chunk(StreamChunk::Error {
                        message: format!(
                            "arguments for tool {name} (block {index}) could not be parsed: {error}"
                        ),
                    });
                }
                ProtocolEvent::BlockStop { index } => {
                    if current_text == Some(index) {
                        current_text = None;
                        if let Some(text) = text_buffers.remove(&index) {
                            parts.insert(index, ContentPart::text(text));
                        }
                    }
                }
                ProtocolEvent::StopReason { reason } => stop_reason = Some(reason),
                ProtocolEvent::MessageStop => {
                    saw_message_stop = true;
                    break;
                }
            }
        }

        if !saw_message_stop {
            tracing::debug!("model stream ended without message_stop");
            // Keep whatever text was mid-flight when the stream ended
            for (index, text) in text_buffers {
                if !text.is_empty() {
                    parts.entry(index).or_insert(ContentPart::text(text));
                }
            }
        }

        Ok(FoldedTurn {
            content: parts.into_values().collect(),
            stop_reason,
        })
    }
}

struct FoldedTurn {
    content: Vec<ContentPart>,
    stop_reason: Option<StopReason>,
}

/// Whether a message carries anything worth keeping in history
fn has_meaningful_content(message: &Message) -> bool {
    message.content().iter().any(|part| match part {
        ContentPart::Text { text } => !text.trim().is_empty(),
        ContentPart::ToolUse { name, .. } => !name.is_empty(),
        ContentPart::ToolResult { .. } => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationStatus;
    use crate::tools;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use vigil_exec::ScriptQueue;
    use vigil_net::NetworkCache;

    /// Transport that replays one scripted event sequence per turn
    struct ScriptedTransport {
        turns: Mutex<Vec<Vec<ProtocolEvent>>>,
    }

    impl ScriptedTransport {
        fn new(turns: Vec<Vec<ProtocolEvent>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns),
            })
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn stream(
            &self,
            _request: ModelRequest,
            _cancel: CancellationToken,
        ) -> vigil_ai::Result<ProtocolEventStream> {
            let events = {
                let mut turns = self.turns.lock();
                if turns.is_empty() {
                    text_turn(&["done"])
                } else {
                    turns.remove(0)
                }
            };
            Ok(Box::pin(async_stream::stream! {
                for event in events {
                    yield Ok(event);
                }
            }))
        }
    }

    /// Transport that streams a delta and then hangs until cancelled
    struct HangingTransport;

    #[async_trait]
    impl ModelTransport for HangingTransport {
        async fn stream(
            &self,
            _request: ModelRequest,
            cancel: CancellationToken,
        ) -> vigil_ai::Result<ProtocolEventStream> {
            Ok(Box::pin(async_stream::stream! {
                yield Ok(ProtocolEvent::BlockStart { index: 0, kind: BlockKind::Text });
                yield Ok(ProtocolEvent::TextDelta { text: "partial".to_string() });
                cancel.cancelled().await;
            }))
        }
    }

    fn text_turn(deltas: &[&str]) -> Vec<ProtocolEvent> {
        let mut events = vec![
            ProtocolEvent::UsageStart { tokens_in: 10 },
            ProtocolEvent::BlockStart {
                index: 0,
                kind: BlockKind::Text,
            },
        ];
        for delta in deltas {
            events.push(ProtocolEvent::TextDelta {
                text: delta.to_string(),
            });
        }
        events.extend([
            ProtocolEvent::BlockStop { index: 0 },
            ProtocolEvent::Usage { tokens_out: 5 },
            ProtocolEvent::StopReason {
                reason: StopReason::EndTurn,
            },
            ProtocolEvent::MessageStop,
        ]);
        events
    }

    fn tool_turn(id: &str, name: &str, input: serde_json::Value) -> Vec<ProtocolEvent> {
        vec![
            ProtocolEvent::UsageStart { tokens_in: 10 },
            ProtocolEvent::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                },
            },
            ProtocolEvent::ToolUse {
                index: 0,
                id: id.to_string(),
                name: name.to_string(),
                input,
            },
            ProtocolEvent::BlockStop { index: 0 },
            ProtocolEvent::Usage { tokens_out: 8 },
            ProtocolEvent::StopReason {
                reason: StopReason::ToolUse,
            },
            ProtocolEvent::MessageStop,
        ]
    }

    fn empty_registry() -> Arc<ToolRegistry> {
        Arc::new(tools::default_registry(
            Arc::new(NetworkCache::new()),
            Arc::new(ScriptQueue::new()),
        ))
    }

    fn orchestrator(transport: Arc<dyn ModelTransport>) -> Orchestrator {
        Orchestrator::new(transport, empty_registry(), OrchestratorConfig::default())
    }

    /// Poll until the conversation leaves `streaming`, collecting every chunk
    async fn wait_terminal(orch: &Orchestrator, id: &str) -> ConversationUpdate {
        let mut chunks = Vec::new();
        for _ in 0..500 {
            let update = orch.poll(id).expect("conversation should exist");
            chunks.extend(update.chunks);
            if update.status.is_terminal() {
                return ConversationUpdate {
                    chunks,
                    status: update.status,
                    full_text: update.full_text,
                };
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("conversation never reached a terminal state");
    }

    #[tokio::test]
    async fn test_single_turn_without_tools() {
        let orch = orchestrator(ScriptedTransport::new(vec![text_turn(&[
            "Hi", " there", "!",
        ])]));
        orch.start("c1", "Hello", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Completed);
        assert_eq!(update.full_text, "Hi there!");
        let texts: Vec<&str> = update
            .chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hi", " there", "!"]);
        assert!(matches!(update.chunks.last(), Some(StreamChunk::Finish)));

        let conv = orch.conversation("c1").unwrap();
        let conv = conv.lock();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].role(), "user");
        assert_eq!(conv.messages[1].text(), "Hi there!");
        assert_eq!(conv.tokens_in, 10);
        assert_eq!(conv.tokens_out, 5);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let orch = orchestrator(ScriptedTransport::new(vec![
            tool_turn("tu_1", "get_cache_statistics", json!({})),
            text_turn(&["ok"]),
        ]));
        orch.start("c1", "how many requests?", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Completed);
        let kinds: Vec<&str> = update
            .chunks
            .iter()
            .map(|c| match c {
                StreamChunk::ToolCall { .. } => "tool_call",
                StreamChunk::ToolResult { .. } => "tool_result",
                StreamChunk::TextDelta { .. } => "text_delta",
                StreamChunk::Error { .. } => "error",
                StreamChunk::Finish => "finish",
            })
            .collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "text_delta", "finish"]);

        match &update.chunks[1] {
            StreamChunk::ToolResult { id, name, result } => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "get_cache_statistics");
                assert_eq!(result["totalRequests"], 0);
            }
            other => panic!("unexpected chunk: {other:?}"),
        }

        // The tool_use and its tool_result live in the same assistant message
        let conv = orch.conversation("c1").unwrap();
        let conv = conv.lock();
        assert_eq!(conv.messages.len(), 3);
        let tool_message = &conv.messages[1];
        assert_eq!(tool_message.tool_uses().len(), 1);
        assert!(tool_message
            .content()
            .iter()
            .any(|p| matches!(p, ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "tu_1")));
    }

    #[tokio::test]
    async fn test_unparsable_tool_args_complete_with_error_chunk() {
        let events = vec![
            ProtocolEvent::UsageStart { tokens_in: 4 },
            ProtocolEvent::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse {
                    id: "tu_1".to_string(),
                    name: "get_request_details".to_string(),
                },
            },
            ProtocolEvent::ToolArgsParseError {
                index: 0,
                name: "get_request_details".to_string(),
                error: "EOF while parsing a string".to_string(),
            },
            ProtocolEvent::BlockStop { index: 0 },
            ProtocolEvent::StopReason {
                reason: StopReason::EndTurn,
            },
            ProtocolEvent::MessageStop,
        ];
        let orch = orchestrator(ScriptedTransport::new(vec![events]));
        orch.start("c1", "inspect", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Completed);
        assert!(update.chunks.iter().any(|c| matches!(
            c,
            StreamChunk::Error { message } if message.contains("could not be parsed")
        )));
        assert!(matches!(update.chunks.last(), Some(StreamChunk::Finish)));
        // No tool was dispatched
        assert!(!update
            .chunks
            .iter()
            .any(|c| matches!(c, StreamChunk::ToolCall { .. })));
    }

    #[tokio::test]
    async fn test_loop_detection_on_repeated_misuse() {
        // Three turns in a row call get_request_details without requestId;
        // the fourth scripted turn must never be reached
        let misuse = || tool_turn("tu_x", "get_request_details", json!({}));
        let orch = orchestrator(ScriptedTransport::new(vec![
            misuse(),
            misuse(),
            misuse(),
            text_turn(&["never"]),
        ]));
        orch.start("c1", "details please", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Error);
        let tool_results = update
            .chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::ToolResult { .. }))
            .count();
        assert_eq!(tool_results, 3);
        match update.chunks.last() {
            Some(StreamChunk::Error { message }) => {
                assert!(message.contains("repeatedly misusing tool get_request_details"));
            }
            other => panic!("expected terminal error chunk, got {other:?}"),
        }
        assert!(update.full_text.is_empty());
    }

    #[tokio::test]
    async fn test_successful_call_resets_loop_counter() {
        let orch = orchestrator(ScriptedTransport::new(vec![
            tool_turn("tu_1", "get_request_details", json!({})),
            tool_turn("tu_2", "get_request_details", json!({})),
            tool_turn("tu_3", "get_cache_statistics", json!({})),
            tool_turn("tu_4", "get_request_details", json!({})),
            text_turn(&["fine"]),
        ]));
        orch.start("c1", "go", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        // The success in between keeps the failure streak under the limit
        assert_eq!(update.status, ConversationStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_mid_stream() {
        let orch = orchestrator(Arc::new(HangingTransport));
        orch.start("c1", "hang", "tab-1");
        tokio::time::sleep(Duration::from_millis(10)).await;

        orch.abort("c1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Aborted);
        // Buffered deltas are still delivered, but no terminal chunk follows
        assert!(update
            .chunks
            .iter()
            .all(|c| matches!(c, StreamChunk::TextDelta { .. })));

        // abort is idempotent: no extra chunks appear
        orch.abort("c1");
        let again = orch.poll("c1").unwrap();
        assert!(again.chunks.is_empty());
        assert_eq!(again.status, ConversationStatus::Aborted);
    }

    #[tokio::test]
    async fn test_turn_cap() {
        let endless = (0..10)
            .map(|i| tool_turn(&format!("tu_{i}"), "get_cache_statistics", json!({})))
            .collect();
        let config = OrchestratorConfig {
            max_turns: 3,
            ..Default::default()
        };
        let orch = Orchestrator::new(ScriptedTransport::new(endless), empty_registry(), config);
        orch.start("c1", "loop forever", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Error);
        match update.chunks.last() {
            Some(StreamChunk::Error { message }) => {
                assert!(message.contains("3-turn cap"), "got: {message}");
            }
            other => panic!("expected error chunk, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_model_error_removes_trailing_user_message() {
        struct FailingTransport;
        #[async_trait]
        impl ModelTransport for FailingTransport {
            async fn stream(
                &self,
                _request: ModelRequest,
                _cancel: CancellationToken,
            ) -> vigil_ai::Result<ProtocolEventStream> {
                Err(vigil_ai::Error::ModelHttp {
                    status: 401,
                    body: "invalid x-api-key".to_string(),
                })
            }
        }

        let orch = orchestrator(Arc::new(FailingTransport));
        orch.start("c1", "hello", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Error);
        assert!(matches!(
            update.chunks.as_slice(),
            [StreamChunk::Error { .. }]
        ));
        let conv = orch.conversation("c1").unwrap();
        assert!(conv.lock().messages.is_empty());
    }

    #[tokio::test]
    async fn test_history_trimmed_across_turns() {
        let turns: Vec<Vec<ProtocolEvent>> = (0..8)
            .map(|i| tool_turn(&format!("tu_{i}"), "get_cache_statistics", json!({})))
            .chain([text_turn(&["done"])])
            .collect();
        let config = OrchestratorConfig {
            max_history_messages: 4,
            ..Default::default()
        };
        let orch = Orchestrator::new(ScriptedTransport::new(turns), empty_registry(), config);
        orch.start("c1", "dig in", "tab-1");
        let update = wait_terminal(&orch, "c1").await;

        assert_eq!(update.status, ConversationStatus::Completed);
        let conv = orch.conversation("c1").unwrap();
        let conv = conv.lock();
        // One message over the bound at most: the final assistant append
        // happens after the pre-turn trim
        assert!(conv.messages.len() <= 5);
        for message in &conv.messages {
            let uses = message.tool_uses().len();
            let results = message
                .content()
                .iter()
                .filter(|p| matches!(p, ContentPart::ToolResult { .. }))
                .count();
            assert_eq!(uses, results);
        }
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let orch = orchestrator(ScriptedTransport::new(vec![text_turn(&["hi"])]));
        orch.start("c1", "hello", "tab-1");
        wait_terminal(&orch, "c1").await;

        orch.cleanup("c1");
        assert!(orch.poll("c1").is_none());
        orch.cleanup("c1");
        assert!(orch.poll("c1").is_none());
    }

    #[tokio::test]
    async fn test_poll_drains_exactly_once() {
        let orch = orchestrator(ScriptedTransport::new(vec![text_turn(&["a", "b"])]));
        orch.start("c1", "hello", "tab-1");
        let update = wait_terminal(&orch, "c1").await;
        assert!(!update.chunks.is_empty());

        let empty = orch.poll("c1").unwrap();
        assert!(empty.chunks.is_empty());
        assert_eq!(empty.full_text, "ab");
    }
}
