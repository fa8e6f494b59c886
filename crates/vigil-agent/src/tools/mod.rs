//! Built-in tools for the security-analysis agent

mod network;
mod script;

pub use network::{
    GetCacheStatistics, GetNetworkRequests, GetRequestBodyChunk, GetRequestDetails,
    SearchRequestContent, SearchRequests,
};
pub use script::{ExecuteJavascript, ExposeRequestData, PAGE_NAMESPACE};

use crate::tool::ToolRegistry;
use std::sync::Arc;
use vigil_exec::ScriptQueue;
use vigil_net::NetworkCache;

/// Build the standard registry: every tool the agent advertises, in the
/// order the model sees them.
pub fn default_registry(cache: Arc<NetworkCache>, queue: Arc<ScriptQueue>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GetNetworkRequests::new(cache.clone())));
    registry.register(Arc::new(GetRequestDetails::new(cache.clone())));
    registry.register(Arc::new(GetRequestBodyChunk::new(cache.clone())));
    registry.register(Arc::new(SearchRequests::new(cache.clone())));
    registry.register(Arc::new(SearchRequestContent::new(cache.clone())));
    registry.register(Arc::new(ExposeRequestData::new(cache.clone(), queue.clone())));
    registry.register(Arc::new(GetCacheStatistics::new(cache)));
    registry.register(Arc::new(ExecuteJavascript::new(queue)));
    registry
}
