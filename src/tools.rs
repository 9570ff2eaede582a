//! Tool execution: the boundary between the advance engine and whatever executes a
//! tool call the model asked for.
//!
//! [`ToolProvider`] plays the role of an MCP-style tool catalog without depending on an
//! actual MCP transport — a caller wanting true MCP execution supplies their own impl
//! that proxies to an MCP client. [`ToolRegistry`] is the in-process reference
//! implementation, for tests and for callers who just want to register a few closures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::Result;

/// Anything capable of executing a named tool call and returning its result as a raw
/// string, ready to be wrapped in a tool-result message verbatim.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
    /// Execute `tool_name` with `arguments_json` passed through unparsed, matching
    /// whatever wire format the completion provider emitted it in. Unknown tool names
    /// and handler failures both surface as `Error::ToolExecution`; the advance engine
    /// catches this per call and turns it into an `"Error: ..."` tool-result string
    /// rather than aborting the whole turn.
    async fn execute(&self, tool_name: &str, arguments_json: &str) -> Result<String>;
}

/// A registered handler: takes parsed arguments, returns a JSON result.
type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// In-process catalog of named async handlers. Not thread-unsafe to mutate after
/// construction — registration happens once, up front, via [`ToolRegistryBuilder`].
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    /// Start an empty registry.
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            handlers: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl ToolProvider for ToolRegistry {
    async fn execute(&self, tool_name: &str, arguments_json: &str) -> Result<String> {
        let handler = self
            .handlers
            .get(tool_name)
            .ok_or_else(|| Error::tool_execution(tool_name, "no such tool registered"))?;

        let args: Value = serde_json::from_str(arguments_json)
            .map_err(|e| Error::tool_execution(tool_name, format!("invalid arguments JSON: {e}")))?;

        let result = handler(args)
            .await
            .map_err(|e| Error::tool_execution(tool_name, e.to_string()))?;

        Ok(result.to_string())
    }
}

/// Builder for [`ToolRegistry`]: register handlers one at a time, then [`build`](Self::build).
pub struct ToolRegistryBuilder {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistryBuilder {
    /// Register a handler under `name`. Re-registering the same name replaces the
    /// previous handler.
    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registered_tool_executes() {
        let registry = ToolRegistry::builder()
            .register("add", |args| async move {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(json!({ "sum": a + b }))
            })
            .build();

        let result = registry.execute("add", r#"{"a": 2, "b": 3}"#).await.unwrap();
        assert_eq!(result, json!({ "sum": 5 }).to_string());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_execution_error() {
        let registry = ToolRegistry::builder().build();
        let err = registry.execute("missing", "{}").await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_tool_execution_error() {
        let registry = ToolRegistry::builder()
            .register("echo", |args| async move { Ok(args) })
            .build();
        let err = registry.execute("echo", "not json").await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_handler_failure_propagates_as_tool_execution_error() {
        let registry = ToolRegistry::builder()
            .register("boom", |_args| async move {
                Err(Error::integrity("handler exploded"))
            })
            .build();
        let err = registry.execute("boom", "{}").await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_re_registering_a_name_replaces_the_handler() {
        let registry = ToolRegistry::builder()
            .register("pick", |_args| async move { Ok(json!("first")) })
            .register("pick", |_args| async move { Ok(json!("second")) })
            .build();
        let result = registry.execute("pick", "{}").await.unwrap();
        assert_eq!(result, "\"second\"");
    }
}
