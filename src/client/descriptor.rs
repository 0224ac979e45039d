use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STREAMABLE_HTTP: &str = "streamableHttp";

/// What an agent needs to reach this snapp through the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpConnection {
    #[serde(rename = "type")]
    pub transport: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl McpConnection {
    /// The bearer header is only attached when auth is required and a key is
    /// known.
    pub fn new(url: &str, require_auth_header: bool, user_api_key: Option<&str>) -> Self {
        let headers = match (require_auth_header, user_api_key) {
            (true, Some(key)) => Some(BTreeMap::from([(
                "Authorization".to_string(),
                format!("Bearer {key}"),
            )])),
            _ => None,
        };
        Self {
            transport: STREAMABLE_HTTP.to_string(),
            url: url.to_string(),
            headers,
        }
    }
}

/// Lowercase, dash-separated label derived from the app name. A trailing
/// "Snapp" word is dropped ("Hello World Snapp" -> "hello-world").
pub fn server_label(app_name: &str) -> String {
    let mut label = String::with_capacity(app_name.len());
    for c in app_name.chars() {
        if c.is_ascii_alphanumeric() {
            label.push(c.to_ascii_lowercase());
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
    }
    let label = label.trim_end_matches('-');
    let label = label.strip_suffix("-snapp").unwrap_or(label).to_string();
    if label.is_empty() {
        "snapp".to_string()
    } else {
        label
    }
}

/// MCP client configuration block shown to the user, e.g.
/// `{"hello-world": {"type": "streamableHttp", "url": ...}}`.
pub fn client_config(label: &str, connection: &McpConnection) -> Value {
    let mut servers = Map::new();
    servers.insert(
        label.to_string(),
        serde_json::to_value(connection).unwrap_or(Value::Null),
    );
    Value::Object(servers)
}

pub fn render_client_config(label: &str, connection: &McpConnection) -> String {
    let config = client_config(label, connection);
    serde_json::to_string_pretty(&config).unwrap_or_else(|_| config.to_string())
}
