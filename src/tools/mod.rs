mod textarea;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

pub use textarea::{
    GET_TEXTAREA, MAX_TEXTAREA_LENGTH, ResourceError, SharedText, TextResource, UPDATE_TEXTAREA,
    textarea_tools,
};

const MAX_REPORTED_VIOLATIONS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: true,
        }
    }

    /// Concatenated text of every content item.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A handler's own failure. Converted into an error result at the dispatch
/// boundary.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolFault(pub String);

impl From<ResourceError> for ToolFault {
    fn from(err: ResourceError) -> Self {
        Self(err.to_string())
    }
}

pub trait ToolHandler: Send + Sync {
    fn call(&self, args: Map<String, Value>) -> BoxFuture<'_, Result<ToolResult, ToolFault>>;
}

impl<F> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> BoxFuture<'static, Result<ToolResult, ToolFault>> + Send + Sync,
{
    fn call(&self, args: Map<String, Value>) -> BoxFuture<'_, Result<ToolResult, ToolFault>> {
        self(args)
    }
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Public descriptor of a registered tool, as advertised to agents.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool '{name}' input schema must be a JSON object")]
    SchemaNotObject { name: String },
    #[error("tool '{name}' has an invalid input schema: {message}")]
    InvalidSchema { name: String, message: String },
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Static set of tools registered at startup and dispatched by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the shared-textarea tools over `resource`.
    pub fn with_textarea(resource: Arc<dyn TextResource>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for definition in textarea_tools(resource) {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        let ToolDefinition {
            name,
            description,
            input_schema,
            handler,
        } = definition;

        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let Some(schema_object) = input_schema.as_object().cloned() else {
            return Err(RegistryError::SchemaNotObject { name });
        };
        let validator =
            jsonschema::validator_for(&input_schema).map_err(|err| RegistryError::InvalidSchema {
                name: name.clone(),
                message: err.to_string(),
            })?;

        debug!(tool = %name, "tool registered");
        self.tools.insert(
            name.clone(),
            RegisteredTool {
                descriptor: ToolDescriptor {
                    name,
                    description,
                    input_schema: schema_object,
                },
                validator,
                handler,
            },
        );
        Ok(())
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    /// Validate and run a tool. Never fails: every problem is reported as an
    /// error result so the bridged connection survives it.
    pub async fn invoke(&self, name: &str, args: Option<Map<String, Value>>) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "agent called unknown tool");
            return ToolResult::error(format!("Unknown tool '{name}'"));
        };

        let args = args.unwrap_or_default();
        let instance = Value::Object(args);
        let violations = tool
            .validator
            .iter_errors(&instance)
            .take(MAX_REPORTED_VIOLATIONS)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect::<Vec<_>>();
        if !violations.is_empty() {
            warn!(tool = name, violations = ?violations, "tool arguments failed schema validation");
            return ToolResult::error(format!(
                "Invalid arguments for '{name}': {}",
                violations.join("; ")
            ));
        }

        let Value::Object(args) = instance else {
            return ToolResult::error(format!("Invalid arguments for '{name}'"));
        };

        let handler = tool.handler.clone();
        match AssertUnwindSafe(async move { handler.call(args).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => {
                warn!(tool = name, error = %fault, "tool handler failed");
                ToolResult::error(format!("Tool '{name}' failed: {fault}"))
            }
            Err(_) => {
                error!(tool = name, "tool handler panicked");
                ToolResult::error(format!("Tool '{name}' failed unexpectedly"))
            }
        }
    }
}
