//! The capability-set polymorphism the dispatcher routes over: tool,
//! resource, and prompt handlers each expose `handle(params) -> result`,
//! per the "polymorphism over handlers" design note in `spec.md` §9.

use async_trait::async_trait;
use serde_json::Value;

use memcortex_protocol::MemoryResult;

/// Static description of a registered tool, returned by `tools/list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
}

/// A handler for `tools/call` on one named tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with its call parameters.
    async fn call(&self, params: Option<Value>) -> MemoryResult<Value>;

    /// The tool's static definition, for `tools/list`.
    fn definition(&self) -> ToolDefinition;
}

/// Static description of a registered resource, returned by
/// `resources/list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// MIME type of the resource content, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A handler for `resources/read` on one named resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource's current content.
    async fn read(&self, uri: &str) -> MemoryResult<Value>;

    /// The resource's static definition, for `resources/list`.
    fn definition(&self) -> ResourceDefinition;
}

/// Static description of a registered prompt, returned by `prompts/list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PromptDefinition {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// A handler for `prompts/get` on one named prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Render the prompt with its call parameters.
    async fn get(&self, params: Option<Value>) -> MemoryResult<Value>;

    /// The prompt's static definition, for `prompts/list`.
    fn definition(&self) -> PromptDefinition;
}
