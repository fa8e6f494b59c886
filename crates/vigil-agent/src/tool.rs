//! Tool trait and dispatch registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_ai::ToolSpec;

/// Outcome of a tool execution, surfaced to the model as a tool_result part
/// and to the consumer as a tool_result chunk.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// JSON payload handed back to the model
    pub payload: serde_json::Value,
    pub is_error: bool,
}

impl ToolOutcome {
    /// Successful structured result
    pub fn json(payload: serde_json::Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    /// Successful plain-text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: serde_json::Value::String(text.into()),
            is_error: false,
        }
    }

    /// Recoverable structured error the model can self-correct from
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "error": reason.into() }),
            is_error: true,
        }
    }

    /// The payload as the string carried in the tool_result part
    pub fn content_str(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this result counts as a failure for loop detection: an
    /// explicit error flag, an `error` field, or the textual markers the
    /// tools use for missing data.
    pub fn is_failure(&self) -> bool {
        if self.is_error {
            return true;
        }
        if self.payload.get("error").is_some() {
            return true;
        }
        if let serde_json::Value::String(s) = &self.payload {
            let lower = s.to_lowercase();
            return lower.contains("not found") || lower.contains("undefined");
        }
        false
    }
}

/// Trait for executable tools. Every tool receives the target captured at
/// conversation start plus the conversation's cancellation token.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for the tool input
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool
    async fn execute(
        &self,
        target_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Ordered registry of tools with pre-compiled input validators
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.validators
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    tool = tool.name(),
                    "invalid parameter schema, skipping validation: {e}"
                );
            }
        }
        self.tools.push(tool);
    }

    /// Tool definitions in registration order, for the model request
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec::new(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Validate and execute one tool call. Unknown names and invalid inputs
    /// come back as structured errors so the model can self-correct.
    pub async fn dispatch(
        &self,
        name: &str,
        target_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolOutcome::error(format!(
                "Unknown tool: {name}. Available tools: {}",
                self.names().join(", ")
            ));
        };

        if let Some(validator) = self.validators.get(name) {
            if let Some(message) = validation_errors(validator, &input) {
                return ToolOutcome::error(message);
            }
        }

        tool.execute(target_id, input, cancel).await
    }
}

fn validation_errors(validator: &jsonschema::Validator, input: &serde_json::Value) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!("Invalid tool input: {}", errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the message back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            })
        }
        async fn execute(
            &self,
            _target_id: &str,
            input: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolOutcome {
            ToolOutcome::json(json!({ "echoed": input["message"] }))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[tokio::test]
    async fn test_dispatch_valid_input() {
        let outcome = registry()
            .dispatch(
                "echo",
                "tab-1",
                json!({"message": "hi"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.payload["echoed"], "hi");
    }

    #[tokio::test]
    async fn test_dispatch_missing_required_field() {
        let outcome = registry()
            .dispatch("echo", "tab-1", json!({}), CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        assert!(outcome.payload["error"]
            .as_str()
            .unwrap()
            .contains("Invalid tool input"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_names_available_tools() {
        let outcome = registry()
            .dispatch("transmogrify", "tab-1", json!({}), CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        let message = outcome.payload["error"].as_str().unwrap();
        assert!(message.contains("Unknown tool: transmogrify"));
        assert!(message.contains("echo"));
    }

    #[test]
    fn test_failure_classification() {
        assert!(ToolOutcome::error("nope").is_failure());
        assert!(ToolOutcome::json(json!({"error": "Request not found: "})).is_failure());
        assert!(ToolOutcome::text("undefined").is_failure());
        assert!(ToolOutcome::text("ReferenceError: x is not found here").is_failure());
        assert!(!ToolOutcome::json(json!({"total": 3})).is_failure());
        assert!(!ToolOutcome::text("42").is_failure());
    }

    #[test]
    fn test_specs_preserve_registration_order() {
        let registry = registry();
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].input_schema["type"], "object");
    }
}
