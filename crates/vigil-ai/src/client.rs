//! SSE model client: one streaming request per agent turn

use crate::{
    error::{Error, Result},
    stream::{BlockKind, ProtocolEvent, ProtocolEventStream},
    types::{ContentPart, Message, StopReason, ToolSpec},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Everything needed for one streaming model call
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub system: String,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// The seam the orchestrator drives the model through; lets tests substitute
/// a scripted event stream for the live endpoint.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Issue one streaming request and yield protocol events in wire order.
    /// The sequence terminates on message_stop, upstream EOF, error, or
    /// cancellation; after cancellation no further events are emitted.
    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<ProtocolEventStream>;
}

/// Retry policy for opening the stream (never applied mid-stream)
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Endpoint configuration for the live client
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl ModelConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

/// Client for a Claude-style messages endpoint
pub struct ModelClient {
    http: reqwest::Client,
    config: ModelConfig,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`
    pub fn from_env(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(ModelConfig::new(base_url, api_key, model)))
    }

    fn build_request(&self, request: &ModelRequest) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: convert_messages(&request.messages),
            max_tokens: request.max_tokens,
            stream: true,
            system: if request.system.is_empty() {
                None
            } else {
                Some(request.system.clone())
            },
            temperature: request.temperature,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.clone())
            },
        }
    }
}

#[async_trait]
impl ModelTransport for ModelClient {
    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<ProtocolEventStream> {
        let body = self.build_request(&request);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        tracing::debug!(%url, messages = request.messages.len(), "opening model stream");

        let builder = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(&body);

        let event_source = EventSource::new(builder)
            .map_err(|e| Error::Transport(format!("failed to open event source: {e}")))?;

        Ok(Box::pin(decode_sse(event_source, cancel)))
    }
}

/// Drive the EventSource, turning SSE frames into protocol events
fn decode_sse(
    mut source: EventSource,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = Result<ProtocolEvent>> {
    stream! {
        let mut decoder = EventDecoder::default();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    source.close();
                    return;
                }
                next = source.next() => next,
            };
            let Some(event) = next else { return };
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(frame)) => {
                    let mut done = false;
                    for ev in decoder.decode(&frame.event, &frame.data) {
                        done = done || matches!(ev, ProtocolEvent::MessageStop);
                        yield Ok(ev);
                    }
                    if done {
                        source.close();
                        return;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => return,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield Err(Error::ModelHttp { status: status.as_u16(), body });
                    return;
                }
                Err(e) => {
                    yield Err(Error::Transport(e.to_string()));
                    return;
                }
            }
        }
    }
}

// ============================================================================
// SSE frame decoding
// ============================================================================

/// Per-block assembly state for one streamed message.
///
/// Kept separate from the IO loop so the event-name dispatch and the
/// per-index argument reassembly can be exercised without a server.
#[derive(Debug, Default)]
pub(crate) struct EventDecoder {
    blocks: Vec<Block>,
}

#[derive(Debug, Default, Clone)]
enum Block {
    #[default]
    Empty,
    Text,
    ToolUse {
        id: String,
        name: String,
        args: String,
    },
}

impl EventDecoder {
    /// Decode one complete SSE record into zero or more protocol events.
    /// Malformed JSON on a data line is logged and skipped; unknown event
    /// names are ignored.
    pub(crate) fn decode(&mut self, event: &str, data: &str) -> Vec<ProtocolEvent> {
        match event {
            "message_start" => {
                let Ok(frame) = serde_json::from_str::<MessageStartFrame>(data) else {
                    return self.skip(event, data);
                };
                vec![ProtocolEvent::UsageStart {
                    tokens_in: frame.message.usage.input_tokens,
                }]
            }
            "content_block_start" => {
                let Ok(frame) = serde_json::from_str::<BlockStartFrame>(data) else {
                    return self.skip(event, data);
                };
                let index = frame.index;
                self.ensure_block(index);
                match frame.content_block.block_type.as_str() {
                    "text" => {
                        self.blocks[index] = Block::Text;
                        vec![ProtocolEvent::BlockStart {
                            index,
                            kind: BlockKind::Text,
                        }]
                    }
                    "tool_use" => {
                        let id = frame.content_block.id.unwrap_or_default();
                        let name = frame.content_block.name.unwrap_or_default();
                        self.blocks[index] = Block::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            args: String::new(),
                        };
                        vec![ProtocolEvent::BlockStart {
                            index,
                            kind: BlockKind::ToolUse { id, name },
                        }]
                    }
                    other => {
                        tracing::debug!(block_type = other, "ignoring content block type");
                        vec![]
                    }
                }
            }
            "content_block_delta" => {
                let Ok(frame) = serde_json::from_str::<BlockDeltaFrame>(data) else {
                    return self.skip(event, data);
                };
                let index = frame.index;
                match frame.delta.delta_type.as_str() {
                    "text_delta" => {
                        if matches!(self.blocks.get(index), Some(Block::Text)) {
                            vec![ProtocolEvent::TextDelta {
                                text: frame.delta.text.unwrap_or_default(),
                            }]
                        } else {
                            vec![]
                        }
                    }
                    "input_json_delta" => {
                        let fragment = frame.delta.partial_json.unwrap_or_default();
                        if let Some(Block::ToolUse { args, .. }) = self.blocks.get_mut(index) {
                            args.push_str(&fragment);
                            vec![ProtocolEvent::ToolArgsDelta { index, fragment }]
                        } else {
                            vec![]
                        }
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let Ok(frame) = serde_json::from_str::<BlockStopFrame>(data) else {
                    return self.skip(event, data);
                };
                let index = frame.index;
                match self.blocks.get(index).cloned() {
                    Some(Block::ToolUse { id, name, args }) => {
                        let mut events = vec![match parse_tool_args(&args) {
                            Ok(input) => ProtocolEvent::ToolUse {
                                index,
                                id,
                                name,
                                input,
                            },
                            Err(error) => {
                                tracing::warn!(%name, index, "tool arguments failed to parse");
                                ProtocolEvent::ToolArgsParseError { index, name, error }
                            }
                        }];
                        events.push(ProtocolEvent::BlockStop { index });
                        events
                    }
                    _ => vec![ProtocolEvent::BlockStop { index }],
                }
            }
            "message_delta" => {
                let Ok(frame) = serde_json::from_str::<MessageDeltaFrame>(data) else {
                    return self.skip(event, data);
                };
                let mut events = vec![ProtocolEvent::Usage {
                    tokens_out: frame.usage.output_tokens,
                }];
                if let Some(reason) = frame.delta.stop_reason {
                    events.push(ProtocolEvent::StopReason {
                        reason: StopReason::from_wire(&reason),
                    });
                }
                events
            }
            "message_stop" => vec![ProtocolEvent::MessageStop],
            "ping" => vec![],
            other => {
                tracing::debug!(event = other, "ignoring SSE event");
                vec![]
            }
        }
    }

    fn ensure_block(&mut self, index: usize) {
        while self.blocks.len() <= index {
            self.blocks.push(Block::Empty);
        }
    }

    fn skip(&self, event: &str, data: &str) -> Vec<ProtocolEvent> {
        tracing::warn!(event, data, "skipping malformed SSE payload");
        vec![]
    }
}

/// An empty argument buffer means the tool takes no input
fn parse_tool_args(buffer: &str) -> std::result::Result<serde_json::Value, String> {
    if buffer.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(buffer).map_err(|e| e.to_string())
}

// ============================================================================
// Request wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: serde_json::Value,
}

/// Convert history into the alternation the endpoint accepts.
///
/// The history keeps tool_result parts inside the assistant message that
/// requested them; on the wire those parts move into a `user` message that
/// immediately follows the assistant's tool_use blocks.
fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::new();
    for message in messages {
        match message {
            Message::User { content } => {
                let blocks: Vec<serde_json::Value> = content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => {
                            serde_json::json!({"type": "text", "text": text})
                        }
                        ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => serde_json::json!({
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": content,
                            "is_error": is_error,
                        }),
                        ContentPart::ToolUse { .. } => {
                            serde_json::json!({"type": "text", "text": ""})
                        }
                    })
                    .collect();
                wire.push(WireMessage {
                    role: "user",
                    content: serde_json::Value::Array(blocks),
                });
            }
            Message::Assistant { content } => {
                let mut assistant_blocks = Vec::new();
                let mut result_blocks = Vec::new();
                for part in content {
                    match part {
                        ContentPart::Text { text } => {
                            if !text.is_empty() {
                                assistant_blocks
                                    .push(serde_json::json!({"type": "text", "text": text}));
                            }
                        }
                        ContentPart::ToolUse { id, name, input } => {
                            assistant_blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": input,
                            }));
                        }
                        ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            result_blocks.push(serde_json::json!({
                                "type": "tool_result",
                                "tool_use_id": tool_use_id,
                                "content": content,
                                "is_error": is_error,
                            }));
                        }
                    }
                }
                if !assistant_blocks.is_empty() {
                    wire.push(WireMessage {
                        role: "assistant",
                        content: serde_json::Value::Array(assistant_blocks),
                    });
                }
                if !result_blocks.is_empty() {
                    wire.push(WireMessage {
                        role: "user",
                        content: serde_json::Value::Array(result_blocks),
                    });
                }
            }
        }
    }
    wire
}

// ============================================================================
// Response frame types (only the fields the decoder uses; everything else is ignored)
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageStartFrame {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct BlockStartFrame {
    index: usize,
    content_block: BlockInfo,
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaFrame {
    index: usize,
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockStopFrame {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaFrame {
    delta: MessageDeltaInfo,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaInfo {
    stop_reason: Option<String>,
}
