//! vigil-exec: the script execution queue
//!
//! A bounded-latency FIFO broker between in-process tool handlers and the
//! page-side runner that actually evaluates JavaScript.

pub mod error;
pub mod queue;

pub use error::ExecError;
pub use queue::{PendingScript, ScriptQueue, DEFAULT_EXECUTION_TIMEOUT};
