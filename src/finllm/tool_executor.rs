//! Tool registry and execution.
//!
//! Tools are plain Rust functions (sync or async) registered under a name
//! together with a parameter schema the model can read. The gateway resolves
//! tool calls coming back from the model against a [`ToolRegistry`] and
//! treats failures as recoverable: a missing or failing tool is logged and
//! skipped, never fatal for the turn.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use finllm::tool_executor::{ToolDefinition, ToolParameter, ToolParameterType, ToolRegistry, ToolResult};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolDefinition::new("add", "Add two numbers")
//!         .with_parameter(ToolParameter::new("a", ToolParameterType::Number).required())
//!         .with_parameter(ToolParameter::new("b", ToolParameterType::Number).required()),
//!     Arc::new(|params| {
//!         let a = params["a"].as_f64().unwrap_or(0.0);
//!         let b = params["b"].as_f64().unwrap_or(0.0);
//!         Ok(ToolResult::success(serde_json::json!({ "sum": a + b })))
//!     }),
//! );
//! assert!(registry.resolve("add").is_some());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Represents the result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful
    pub success: bool,
    /// The output data from the tool
    pub output: serde_json::Value,
    /// Optional error message if execution failed
    pub error: Option<String>,
    /// Metadata about the execution (source, timing, etc.)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Attach application specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn type_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    /// For array types, specifies the type of items
    pub items: Option<Box<ToolParameterType>>,
}

impl ToolParameter {
    /// Define a new tool parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a default value that will be used when the model omits the parameter.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// For array parameters, declare the type of the contained items.
    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(Box::new(item_type));
        self
    }
}

/// What the model sees about a tool: its name, description, and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// Create a definition with the supplied identifier and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render the parameters as the OpenAPI-style object schema provider
    /// APIs expect for function declarations.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                serde_json::Value::String(param.param_type.type_name().to_string()),
            );
            if let Some(description) = &param.description {
                schema.insert(
                    "description".to_string(),
                    serde_json::Value::String(description.clone()),
                );
            }
            if let Some(items) = &param.items {
                schema.insert(
                    "items".to_string(),
                    serde_json::json!({ "type": items.type_name() }),
                );
            }
            if let Some(default) = &param.default {
                schema.insert("default".to_string(), default.clone());
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(schema));
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Error types for tool operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON arguments failed validation or deserialization.
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Type alias for synchronous tool functions
pub type ToolFunction = Arc<
    dyn Fn(serde_json::Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync,
>;

/// Type alias for asynchronous tool functions
pub type AsyncToolFunction = Arc<
    dyn Fn(
            serde_json::Value,
        )
            -> Pin<Box<dyn Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

enum ToolHandler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Registry mapping tool names to their definitions and handlers.
///
/// Registration happens during service wiring, before the registry is shared
/// behind an `Arc`; execution is read-only and safe to call concurrently.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a synchronous tool function.
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolFunction) {
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: ToolHandler::Sync(handler),
            },
        );
    }

    /// Register an asynchronous tool function.
    pub fn register_async(&mut self, definition: ToolDefinition, handler: AsyncToolFunction) {
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: ToolHandler::Async(handler),
            },
        );
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Look a tool up by name.
    pub fn resolve(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|tool| &tool.definition)
    }

    /// Owned definitions for every registered tool, ready to attach to an
    /// upstream request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a named tool with serialized arguments.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let outcome = match &tool.handler {
            ToolHandler::Sync(handler) => handler(arguments),
            ToolHandler::Async(handler) => handler(arguments).await,
        };

        outcome.map_err(|err| ToolError::ExecutionFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_parameter_builder_collects_every_field() {
        let param = ToolParameter::new("symbol", ToolParameterType::String)
            .with_description("Ticker symbol to look up")
            .required()
            .with_default(serde_json::json!("AAPL"));

        assert_eq!(param.name, "symbol");
        assert_eq!(param.param_type, ToolParameterType::String);
        assert_eq!(param.description, Some("Ticker symbol to look up".to_string()));
        assert!(param.required);
        assert_eq!(param.default, Some(serde_json::json!("AAPL")));
    }

    #[test]
    fn test_parameters_render_as_an_object_schema() {
        let definition = ToolDefinition::new("lookup", "Look up a quote")
            .with_parameter(
                ToolParameter::new("symbol", ToolParameterType::String).required(),
            )
            .with_parameter(ToolParameter::new("verbose", ToolParameterType::Boolean));

        let schema = definition.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["symbol"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["symbol"]));
    }

    #[tokio::test]
    async fn test_sync_tools_execute_inline() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("echo", "Echo the arguments"),
            Arc::new(|params| Ok(ToolResult::success(params))),
        );

        let result = registry
            .execute("echo", serde_json::json!({ "hello": "world" }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["hello"], "world");
    }

    #[tokio::test]
    async fn test_async_tools_are_awaited() {
        let mut registry = ToolRegistry::new();
        registry.register_async(
            ToolDefinition::new("delayed", "Answer after yielding"),
            Arc::new(|_params| {
                Box::pin(async {
                    tokio::task::yield_now().await;
                    Ok(ToolResult::success(serde_json::json!({ "done": true })))
                })
            }),
        );

        let result = registry
            .execute("delayed", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.output["done"], true);
    }

    #[tokio::test]
    async fn test_unknown_tools_report_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_handler_errors_map_to_execution_failed() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("broken", "Always fails"),
            Arc::new(|_params| Err("upstream source offline".into())),
        );

        let err = registry
            .execute("broken", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
