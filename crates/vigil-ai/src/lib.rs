//! vigil-ai: streaming model client for the vigil agent
//!
//! Issues one streaming request per agent turn against a Claude-style
//! messages endpoint and decodes the SSE frames into typed protocol events.

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{ModelClient, ModelConfig, ModelRequest, ModelTransport, RetryConfig};
pub use error::{Error, Result};
pub use stream::{BlockKind, ProtocolEvent, ProtocolEventStream};
pub use types::{ContentPart, Message, StopReason, ToolSpec};
