//! Tools that query the captured-network-traffic cache

use crate::tool::{Tool, ToolOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_net::{EntryFilter, NetworkCache, NetworkEntry};

const DEFAULT_PAGE_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 20;
const DEFAULT_BODY_PREVIEW: usize = 500;
const MAX_BODY_PREVIEW: usize = 1500;
const DEFAULT_CHUNK_LENGTH: usize = 2000;
const MAX_CHUNK_LENGTH: usize = 5000;
const SEARCH_RESULT_CAP: usize = 10;
const DEFAULT_CONTENT_LIMIT: usize = 10;
const MAX_CONTENT_LIMIT: usize = 15;

/// Compact per-entry view used in listings and search results
fn summarize(entry: &NetworkEntry) -> serde_json::Value {
    json!({
        "id": entry.id,
        "method": entry.request.method,
        "url": entry.request.url,
        "status": entry.response.status,
        "statusText": entry.response.status_text,
        "contentType": entry.response.content_type,
        "durationMs": entry.timing.duration_ms,
        "requestType": entry.metadata.request_type,
        "hasError": entry.metadata.has_error,
    })
}

fn usize_arg(input: &serde_json::Value, key: &str, default: usize) -> usize {
    input
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// First `limit` characters of a body, with how many there were in total
fn preview_body(body: &Option<String>, limit: usize) -> (Option<String>, usize, bool) {
    match body {
        Some(text) => {
            let total = text.chars().count();
            if total > limit {
                (Some(text.chars().take(limit).collect()), total, true)
            } else {
                (Some(text.clone()), total, false)
            }
        }
        None => (None, 0, false),
    }
}

// ============================================================================
// get_network_requests
// ============================================================================

pub struct GetNetworkRequests {
    cache: Arc<NetworkCache>,
}

impl GetNetworkRequests {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for GetNetworkRequests {
    fn name(&self) -> &str {
        "get_network_requests"
    }

    fn description(&self) -> &str {
        "List captured network requests for the current page, newest last. Returns summaries; use get_request_details for full records."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Maximum requests to return (default 10, capped at 20)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Number of requests to skip (default 0)"
                }
            }
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let limit = usize_arg(&input, "limit", DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
        let offset = usize_arg(&input, "offset", 0);

        let entries = self.cache.entries_for_target(target_id);
        let total = entries.len();
        let page: Vec<serde_json::Value> = entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(summarize)
            .collect();
        let returned = page.len();

        ToolOutcome::json(json!({
            "total": total,
            "returned": returned,
            "offset": offset,
            "hasMore": offset + returned < total,
            "requests": page,
        }))
    }
}

// ============================================================================
// get_request_details
// ============================================================================

pub struct GetRequestDetails {
    cache: Arc<NetworkCache>,
}

impl GetRequestDetails {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for GetRequestDetails {
    fn name(&self) -> &str {
        "get_request_details"
    }

    fn description(&self) -> &str {
        "Full record of one captured request, with request and response bodies truncated to a preview. Use get_request_body_chunk to page through large bodies."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "requestId": {
                    "type": "string",
                    "description": "Id of the captured request"
                },
                "bodyPreviewSize": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Characters of each body to include (default 500, max 1500)"
                }
            },
            "required": ["requestId"]
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(request_id) = input.get("requestId").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("Missing 'requestId' argument");
        };
        let preview =
            usize_arg(&input, "bodyPreviewSize", DEFAULT_BODY_PREVIEW).min(MAX_BODY_PREVIEW);

        let Some(entry) = self.cache.entry(target_id, request_id) else {
            return ToolOutcome::error(format!("Request not found: {request_id}"));
        };

        let (request_body, request_body_size, request_truncated) =
            preview_body(&entry.request.body, preview);
        let (response_body, response_body_size, response_truncated) =
            preview_body(&entry.response.body, preview);

        ToolOutcome::json(json!({
            "id": entry.id,
            "request": {
                "url": entry.request.url,
                "method": entry.request.method,
                "headers": entry.request.headers,
                "body": request_body,
                "bodySize": request_body_size,
                "bodyTruncated": request_truncated,
                "timestamp": entry.request.timestamp,
            },
            "response": {
                "status": entry.response.status,
                "statusText": entry.response.status_text,
                "headers": entry.response.headers,
                "body": response_body,
                "bodySize": response_body_size,
                "bodyTruncated": response_truncated,
                "contentType": entry.response.content_type,
            },
            "timing": entry.timing,
            "metadata": entry.metadata,
        }))
    }
}

// ============================================================================
// get_request_body_chunk
// ============================================================================

pub struct GetRequestBodyChunk {
    cache: Arc<NetworkCache>,
}

impl GetRequestBodyChunk {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for GetRequestBodyChunk {
    fn name(&self) -> &str {
        "get_request_body_chunk"
    }

    fn description(&self) -> &str {
        "Read a slice of a captured request or response body. Offsets and sizes are in characters; follow nextOffset until hasMore is false."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "requestId": {
                    "type": "string",
                    "description": "Id of the captured request"
                },
                "bodyType": {
                    "type": "string",
                    "enum": ["request", "response"],
                    "description": "Which body to read"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Character offset to start from (default 0)"
                },
                "length": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Characters to return (default 2000, max 5000)"
                }
            },
            "required": ["requestId", "bodyType"]
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(request_id) = input.get("requestId").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("Missing 'requestId' argument");
        };
        let Some(body_type) = input.get("bodyType").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("Missing 'bodyType' argument");
        };
        let offset = usize_arg(&input, "offset", 0);
        let length = usize_arg(&input, "length", DEFAULT_CHUNK_LENGTH).min(MAX_CHUNK_LENGTH);

        let Some(entry) = self.cache.entry(target_id, request_id) else {
            return ToolOutcome::error(format!("Request not found: {request_id}"));
        };
        let body = match body_type {
            "request" => entry.request.body.clone(),
            "response" => entry.response.body.clone(),
            other => {
                return ToolOutcome::error(format!(
                    "Invalid bodyType '{other}': expected 'request' or 'response'"
                ))
            }
        }
        .unwrap_or_default();

        let total_size = body.chars().count();
        let chunk: String = body.chars().skip(offset).take(length).collect();
        let chunk_size = chunk.chars().count();
        let has_more = offset + chunk_size < total_size;
        let next_offset = if has_more {
            json!(offset + chunk_size)
        } else {
            json!(null)
        };

        ToolOutcome::json(json!({
            "requestId": request_id,
            "bodyType": body_type,
            "offset": offset,
            "chunkSize": chunk_size,
            "totalSize": total_size,
            "hasMore": has_more,
            "nextOffset": next_offset,
            "chunk": chunk,
        }))
    }
}

// ============================================================================
// search_requests
// ============================================================================

pub struct SearchRequests {
    cache: Arc<NetworkCache>,
}

impl SearchRequests {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for SearchRequests {
    fn name(&self) -> &str {
        "search_requests"
    }

    fn description(&self) -> &str {
        "Filter captured requests by URL substring, HTTP method, and status range. All filters are optional and combined with AND."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Case-insensitive substring of the request URL"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP method, e.g. GET or POST"
                },
                "minStatus": {
                    "type": "integer",
                    "description": "Lowest response status to include"
                },
                "maxStatus": {
                    "type": "integer",
                    "description": "Highest response status to include"
                }
            }
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let url = input.get("url").and_then(|v| v.as_str());
        let filter = EntryFilter {
            method: input
                .get("method")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            min_status: input
                .get("minStatus")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
            max_status: input
                .get("maxStatus")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
        };

        let mut matches = self.cache.filter(target_id, &filter);
        if let Some(needle) = url {
            let needle = needle.to_lowercase();
            matches.retain(|e| e.request.url.to_lowercase().contains(&needle));
        }

        let found = matches.len();
        let requests: Vec<serde_json::Value> = matches
            .iter()
            .take(SEARCH_RESULT_CAP)
            .map(summarize)
            .collect();

        ToolOutcome::json(json!({
            "found": found,
            "filters": {
                "url": url,
                "method": filter.method,
                "minStatus": filter.min_status,
                "maxStatus": filter.max_status,
            },
            "requests": requests,
        }))
    }
}

// ============================================================================
// search_request_content
// ============================================================================

pub struct SearchRequestContent {
    cache: Arc<NetworkCache>,
}

impl SearchRequestContent {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for SearchRequestContent {
    fn name(&self) -> &str {
        "search_request_content"
    }

    fn description(&self) -> &str {
        "Search captured traffic for a string, across URLs and request/response bodies. Each result lists where the query matched."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Case-insensitive string to look for"
                },
                "searchIn": {
                    "type": "string",
                    "enum": ["all", "url", "request_body", "response_body"],
                    "description": "Where to search (default all)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Maximum results (default 10, max 15)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("Missing 'query' argument");
        };
        let search_in = input
            .get("searchIn")
            .and_then(|v| v.as_str())
            .unwrap_or("all");
        let limit = usize_arg(&input, "limit", DEFAULT_CONTENT_LIMIT).min(MAX_CONTENT_LIMIT);

        let needle = query.to_lowercase();
        let contains = |haystack: &Option<String>| {
            haystack
                .as_deref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        };

        let mut results = Vec::new();
        for entry in self.cache.entries_for_target(target_id) {
            let mut matched_in = Vec::new();
            if matches!(search_in, "all" | "url")
                && entry.request.url.to_lowercase().contains(&needle)
            {
                matched_in.push("url");
            }
            if matches!(search_in, "all" | "request_body") && contains(&entry.request.body) {
                matched_in.push("request_body");
            }
            if matches!(search_in, "all" | "response_body") && contains(&entry.response.body) {
                matched_in.push("response_body");
            }
            if !matched_in.is_empty() {
                let mut summary = summarize(&entry);
                summary["matchedIn"] = json!(matched_in);
                results.push(summary);
            }
        }

        let found = results.len();
        results.truncate(limit);

        ToolOutcome::json(json!({
            "query": query,
            "searchIn": search_in,
            "found": found,
            "results": results,
        }))
    }
}

// ============================================================================
// get_cache_statistics
// ============================================================================

pub struct GetCacheStatistics {
    cache: Arc<NetworkCache>,
}

impl GetCacheStatistics {
    pub fn new(cache: Arc<NetworkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for GetCacheStatistics {
    fn name(&self) -> &str {
        "get_cache_statistics"
    }

    fn description(&self) -> &str {
        "Aggregate counts over the captured traffic: totals by method, status, and resource type, plus how many requests failed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        target_id: &str,
        _input: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolOutcome {
        let stats = self.cache.statistics(target_id);
        ToolOutcome::json(json!({
            "totalRequests": stats.total_entries,
            "byMethod": stats.by_method,
            "byStatus": stats.by_status,
            "byType": stats.by_type,
            "errorCount": stats.error_count,
        }))
    }
}
