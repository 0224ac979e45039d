use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::info;

use super::{ToolDefinition, ToolFault, ToolHandler, ToolResult};

pub const UPDATE_TEXTAREA: &str = "update_textarea";
pub const GET_TEXTAREA: &str = "get_textarea";
pub const MAX_TEXTAREA_LENGTH: usize = 2000;

const EMPTY_PLACEHOLDER: &str = "(textarea is empty)";
const LOG_PREVIEW_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("shared textarea is not available")]
    Unavailable,
}

/// Access to the text field shared between the user and the agent.
pub trait TextResource: Send + Sync {
    fn read(&self) -> Result<String, ResourceError>;
    fn write(&self, text: String) -> Result<(), ResourceError>;
}

/// In-process shared text. A write replaces the whole value under the lock,
/// so readers see either the old or the new text.
#[derive(Debug, Default)]
pub struct SharedText {
    value: RwLock<String>,
}

impl SharedText {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            value: RwLock::new(initial.into()),
        }
    }
}

impl TextResource for SharedText {
    fn read(&self) -> Result<String, ResourceError> {
        self.value
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| ResourceError::Unavailable)
    }

    fn write(&self, text: String) -> Result<(), ResourceError> {
        let mut guard = self.value.write().map_err(|_| ResourceError::Unavailable)?;
        *guard = text;
        Ok(())
    }
}

struct UpdateTextarea {
    resource: Arc<dyn TextResource>,
}

impl ToolHandler for UpdateTextarea {
    fn call(&self, args: Map<String, Value>) -> BoxFuture<'_, Result<ToolResult, ToolFault>> {
        Box::pin(async move {
            let Some(text) = args.get("text").and_then(Value::as_str) else {
                return Err(ToolFault("missing 'text' argument".to_string()));
            };
            info!(preview = %preview(text), "agent updated shared textarea");
            self.resource
                .write(text.to_string())
                .map_err(|err| ToolFault(format!("Error updating shared textarea: {err}")))?;
            Ok(ToolResult::success("Update successful."))
        })
    }
}

struct GetTextarea {
    resource: Arc<dyn TextResource>,
}

impl ToolHandler for GetTextarea {
    fn call(&self, _args: Map<String, Value>) -> BoxFuture<'_, Result<ToolResult, ToolFault>> {
        Box::pin(async move {
            let current = self
                .resource
                .read()
                .map_err(|err| ToolFault(format!("Error reading shared textarea: {err}")))?;
            info!("agent read shared textarea content");
            if current.is_empty() {
                Ok(ToolResult::success(EMPTY_PLACEHOLDER))
            } else {
                Ok(ToolResult::success(current))
            }
        })
    }
}

pub fn textarea_tools(resource: Arc<dyn TextResource>) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: UPDATE_TEXTAREA.to_string(),
            description: "Update the shared textarea content. Use this when the user wants to change or add text to the shared text area that both user and agent can see.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The new text content for the shared textarea",
                        "maxLength": MAX_TEXTAREA_LENGTH
                    }
                },
                "required": ["text"]
            }),
            handler: Arc::new(UpdateTextarea {
                resource: resource.clone(),
            }),
        },
        ToolDefinition {
            name: GET_TEXTAREA.to_string(),
            description: "Get the current content of the shared textarea. Use this to see what the user has typed or what is currently in the shared text area.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            handler: Arc::new(GetTextarea { resource }),
        },
    ]
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head = chars.by_ref().take(LOG_PREVIEW_CHARS).collect::<String>();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
