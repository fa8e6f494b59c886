//! Tools that run code in the host page through the script execution queue

use crate::tool::{Tool, ToolOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_exec::ScriptQueue;
use vigil_net::NetworkCache;

/// Well-known namespace the agent owns inside the page
pub const PAGE_NAMESPACE: &str = "__vigil";

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ============================================================================
// execute_javascript
// ============================================================================

pub struct ExecuteJavascript {
    queue: Arc<ScriptQueue>,
}

impl ExecuteJavascript {
    pub fn new(queue: Arc<ScriptQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for ExecuteJavascript {
    fn name(&self) -> &str {
        "execute_javascript"
    }

    fn description(&self) -> &str {
        "Run JavaScript in the page and return the serialized result along with any console output captured while it ran. Executions time out after 30 seconds."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "JavaScript to evaluate in the page"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(code) = input.get("code").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("Missing 'code' argument");
        };

        // The runner may append a "\n\nConsole logs:\n..." block; surface it as-is
        match self.queue.enqueue(target_id, code.to_string(), cancel).await {
            Ok(result) => ToolOutcome::text(result),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

// ============================================================================
// expose_request_data
// ============================================================================

pub struct ExposeRequestData {
    cache: Arc<NetworkCache>,
    queue: Arc<ScriptQueue>,
}

impl ExposeRequestData {
    pub fn new(cache: Arc<NetworkCache>, queue: Arc<ScriptQueue>) -> Self {
        Self { cache, queue }
    }

    /// Build the array published into the page. Response bodies whose content
    /// type suggests JSON are parsed so the model can walk them in-page.
    fn payload_for(&self, target_id: &str, ids: &[String]) -> Vec<serde_json::Value> {
        let mut exposed = Vec::new();
        for id in ids {
            let Some(entry) = self.cache.entry(target_id, id) else {
                tracing::debug!(%id, "skipping unknown request id");
                continue;
            };
            let response_body = match &entry.response.body {
                Some(body) if entry.has_json_body() => serde_json::from_str(body)
                    .unwrap_or_else(|_| json!(body)),
                Some(body) => json!(body),
                None => json!(null),
            };
            exposed.push(json!({
                "id": entry.id,
                "url": entry.request.url,
                "method": entry.request.method,
                "status": entry.response.status,
                "requestBody": entry.request.body,
                "responseBody": response_body,
            }));
        }
        exposed
    }
}

#[async_trait]
impl Tool for ExposeRequestData {
    fn name(&self) -> &str {
        "expose_request_data"
    }

    fn description(&self) -> &str {
        "Publish captured request/response data into the page under window.__vigil.<variableName> so follow-up execute_javascript calls can inspect it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "requestIds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ids of captured requests to expose"
                },
                "variableName": {
                    "type": "string",
                    "description": "Variable name under the page namespace (default 'data')"
                }
            },
            "required": ["requestIds"]
        })
    }

    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(ids) = input.get("requestIds").and_then(|v| v.as_array()) else {
            return ToolOutcome::error("Missing 'requestIds' argument");
        };
        let ids: Vec<String> = ids
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let variable_name = input
            .get("variableName")
            .and_then(|v| v.as_str())
            .unwrap_or("data");

        // The name is interpolated into page code, so it must be a plain
        // identifier
        if !is_valid_identifier(variable_name) {
            return ToolOutcome::error(format!(
                "Invalid variableName '{variable_name}': must be a JavaScript identifier"
            ));
        }

        let exposed = self.payload_for(target_id, &ids);
        if exposed.is_empty() {
            return ToolOutcome::error("Request not found: none of the requestIds matched captured traffic");
        }
        let exposed_count = exposed.len();

        let code = format!(
            "window.{ns} = window.{ns} || {{}};\nwindow.{ns}.{variable_name} = {data};\n\"ok\"",
            ns = PAGE_NAMESPACE,
            data = serde_json::Value::Array(exposed),
        );

        match self.queue.enqueue(target_id, code, cancel).await {
            Ok(_) => ToolOutcome::json(json!({
                "exposedCount": exposed_count,
                "variableName": variable_name,
                "accessPath": format!("window.{PAGE_NAMESPACE}.{variable_name}"),
            })),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use vigil_net::{EntryMetadata, NetworkEntry, RequestRecord, ResponseRecord, Timing};

    fn json_entry(id: &str, body: &str) -> NetworkEntry {
        NetworkEntry {
            id: id.to_string(),
            request: RequestRecord {
                url: "https://api.example.com/session".to_string(),
                method: "GET".to_string(),
                headers: HashMap::new(),
                body: None,
                timestamp: 1_000.0,
            },
            response: ResponseRecord {
                status: 200,
                status_text: "OK".to_string(),
                headers: HashMap::new(),
                body: Some(body.to_string()),
                content_type: Some("application/json".to_string()),
            },
            timing: Timing {
                start_time: 0.0,
                end_time: 3.0,
                duration_ms: 3.0,
            },
            metadata: EntryMetadata {
                request_type: "xhr".to_string(),
                has_error: false,
                error_message: None,
                cookies: None,
                auth_headers: None,
            },
        }
    }

    /// Serve the queue like the page-side runner would
    fn spawn_runner(queue: Arc<ScriptQueue>, target: &'static str) {
        tokio::spawn(async move {
            loop {
                if let Some(script) = queue.dequeue(target) {
                    queue.resolve(&script.id, format!("ran: {} chars", script.code.len()));
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
    }

    #[tokio::test]
    async fn test_execute_javascript_round_trip() {
        let queue = Arc::new(ScriptQueue::new());
        spawn_runner(queue.clone(), "tab-1");
        let tool = ExecuteJavascript::new(queue);

        let out = tool
            .execute(
                "tab-1",
                json!({"code": "document.title"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error);
        assert!(out.content_str().starts_with("ran:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_javascript_timeout_is_structured() {
        let queue = Arc::new(ScriptQueue::new());
        let tool = ExecuteJavascript::new(queue);

        let exec = tool.execute(
            "tab-1",
            json!({"code": "while(true){}"}),
            CancellationToken::new(),
        );
        let out = tokio::time::timeout(Duration::from_secs(60), exec)
            .await
            .expect("tool must give up before the outer deadline");
        assert!(out.is_error);
        assert_eq!(out.payload["error"], "ExecutionTimeout");
    }

    #[tokio::test]
    async fn test_expose_builds_namespace_script() {
        let cache = Arc::new(NetworkCache::new());
        cache.record("tab-1", json_entry("r1", r#"{"user":"admin"}"#));
        let queue = Arc::new(ScriptQueue::new());

        let tool = ExposeRequestData::new(cache, queue.clone());
        let task = tokio::spawn(async move {
            tool.execute(
                "tab-1",
                json!({"requestIds": ["r1"], "variableName": "sessions"}),
                CancellationToken::new(),
            )
            .await
        });
        tokio::task::yield_now().await;

        let script = queue.dequeue("tab-1").expect("script should be queued");
        assert!(script.code.contains("window.__vigil.sessions ="));
        assert!(script.code.contains("\"user\":\"admin\""));
        queue.resolve(&script.id, "ok");

        let out = task.await.unwrap();
        assert_eq!(out.payload["exposedCount"], 1);
        assert_eq!(out.payload["accessPath"], "window.__vigil.sessions");
    }

    #[tokio::test]
    async fn test_expose_rejects_injection_in_variable_name() {
        let cache = Arc::new(NetworkCache::new());
        cache.record("tab-1", json_entry("r1", "{}"));
        let tool = ExposeRequestData::new(cache, Arc::new(ScriptQueue::new()));

        let out = tool
            .execute(
                "tab-1",
                json!({"requestIds": ["r1"], "variableName": "x;alert(1)"}),
                CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn test_expose_with_no_matching_ids() {
        let cache = Arc::new(NetworkCache::new());
        let tool = ExposeRequestData::new(cache, Arc::new(ScriptQueue::new()));

        let out = tool
            .execute(
                "tab-1",
                json!({"requestIds": ["ghost"]}),
                CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.is_failure());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("data"));
        assert!(is_valid_identifier("_private$1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a-b"));
    }
}
