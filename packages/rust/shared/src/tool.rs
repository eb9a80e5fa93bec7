//! Tool capability contract shared by roles and tool implementations.
//!
//! A tool is a named capability with a JSON-schema parameter description
//! that the completion service may ask to invoke. Roles receive a
//! [`ToolSet`] and forward its definitions with each completion request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LongformError, Result};

/// A capability exposed to the completion service.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description forwarded to the model.
    fn description(&self) -> &str;

    /// JSON schema of the parameters object.
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool with already-parsed parameters.
    async fn execute(&self, params: serde_json::Value) -> Result<String>;
}

/// Serializable description of a tool, as sent to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Cheap-to-clone collection of tools, looked up by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A later tool with the same name shadows an earlier one.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.push(Arc::new(tool));
        self
    }

    pub fn push(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    /// Add every tool of `other`, shadowing same-named tools here.
    pub fn extend(&mut self, other: &ToolSet) {
        for tool in &other.tools {
            self.push(Arc::clone(tool));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute the named tool with a raw JSON argument string.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| LongformError::Tool(format!("unknown tool '{name}'")))?;

        let params: serde_json::Value = if arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                LongformError::Tool(format!("invalid arguments for '{name}': {e}"))
            })?
        };

        tool.execute(params).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Pull a required string parameter out of a tool's argument object.
pub fn required_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| LongformError::Tool(format!("missing required parameter '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text parameter"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, params: serde_json::Value) -> Result<String> {
            Ok(required_str(&params, "text")?.to_uppercase())
        }
    }

    #[tokio::test]
    async fn invoke_by_name() {
        let tools = ToolSet::new().with(Echo);
        let out = tools.invoke("echo", r#"{"text":"hi"}"#).await.expect("invoke");
        assert_eq!(out, "HI");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let tools = ToolSet::new().with(Echo);
        let err = tools.invoke("nope", "{}").await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));

        let err = tools.invoke("echo", "{not json").await.unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));

        let err = tools.invoke("echo", "").await.unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'text'"));
    }

    #[test]
    fn same_name_replaces() {
        let tools = ToolSet::new().with(Echo).with(Echo);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools.definitions()[0].name, "echo");
    }
}
