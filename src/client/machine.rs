use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::bridge::{BridgeEvent, ConnectionInfo};
use super::descriptor::McpConnection;

/// How long transient error banners stay visible.
pub const BANNER_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Bridged,
}

impl ConnectionState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disconnected" => Some(Self::Disconnected),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "bridged" => Some(Self::Bridged),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Bridged => "bridged",
        }
    }

    fn accepts(self, next: Self) -> bool {
        match next {
            Self::Bridged => matches!(self, Self::Connected | Self::Bridged),
            _ => true,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI layer should react to after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiNotification {
    StateChanged(ConnectionState),
    ConnectionInfo(McpConnection),
    AuthRequirementChanged(bool),
    AgentConnected(String),
    AgentDisconnected(String),
    Banner { message: String, ttl: Duration },
}

impl UiNotification {
    pub fn banner(message: impl Into<String>) -> Self {
        Self::Banner {
            message: message.into(),
            ttl: BANNER_TTL,
        }
    }
}

/// Client-side connection state, driven only by relay events and confirmed
/// auth toggles.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    require_auth_header: bool,
    connection_info: Option<ConnectionInfo>,
    descriptor: Option<McpConnection>,
    agents: BTreeSet<String>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            require_auth_header: true,
            connection_info: None,
            descriptor: None,
            agents: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn require_auth_header(&self) -> bool {
        self.require_auth_header
    }

    pub fn descriptor(&self) -> Option<&McpConnection> {
        self.descriptor.as_ref()
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(String::as_str)
    }

    /// Whether there is a live connection the relay has described.
    pub fn has_connection(&self) -> bool {
        self.state != ConnectionState::Disconnected && self.connection_info.is_some()
    }

    pub fn apply(&mut self, event: BridgeEvent) -> Vec<UiNotification> {
        match event {
            BridgeEvent::Status(raw) => self.apply_status(&raw),
            BridgeEvent::ConnectionInfoUpdated(info) => self.apply_connection_info(info),
            BridgeEvent::AgentConnected(agent) => {
                info!(agent = %agent.agent_session_id, "agent connected");
                self.agents.insert(agent.agent_session_id.clone());
                vec![UiNotification::AgentConnected(agent.agent_session_id)]
            }
            BridgeEvent::AgentDisconnected(agent) => {
                info!(agent = %agent.agent_session_id, "agent disconnected");
                self.agents.remove(&agent.agent_session_id);
                vec![UiNotification::AgentDisconnected(agent.agent_session_id)]
            }
            BridgeEvent::Error(message) => {
                warn!(error = %message, "bridge relay reported an error");
                vec![UiNotification::banner(format!("Bridge error: {message}"))]
            }
        }
    }

    /// Record an auth requirement the relay has acknowledged.
    pub fn confirm_auth_requirement(&mut self, require_auth_header: bool) -> Vec<UiNotification> {
        let mut notifications = Vec::new();
        if self.require_auth_header != require_auth_header {
            self.require_auth_header = require_auth_header;
            notifications.push(UiNotification::AuthRequirementChanged(require_auth_header));
        }
        if let Some(descriptor) = self.regenerate_descriptor() {
            notifications.push(UiNotification::ConnectionInfo(descriptor));
        }
        notifications
    }

    /// Forget everything tied to the current user.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn apply_status(&mut self, raw: &str) -> Vec<UiNotification> {
        let Some(next) = ConnectionState::parse(raw) else {
            warn!(status = raw, "ignoring unknown bridge status");
            return Vec::new();
        };
        if !self.state.accepts(next) {
            warn!(from = %self.state, to = %next, "ignoring out-of-order bridge status");
            return Vec::new();
        }
        if next == ConnectionState::Disconnected {
            self.agents.clear();
        }
        if self.state == next {
            debug!(state = %next, "bridge status unchanged");
            return Vec::new();
        }
        info!(from = %self.state, to = %next, "bridge status changed");
        self.state = next;
        vec![UiNotification::StateChanged(next)]
    }

    fn apply_connection_info(&mut self, info: ConnectionInfo) -> Vec<UiNotification> {
        let mut notifications = Vec::new();
        if self.require_auth_header != info.require_auth_header {
            self.require_auth_header = info.require_auth_header;
            notifications.push(UiNotification::AuthRequirementChanged(
                info.require_auth_header,
            ));
        }
        self.connection_info = Some(info);
        if let Some(descriptor) = self.regenerate_descriptor() {
            notifications.push(UiNotification::ConnectionInfo(descriptor));
        }
        notifications
    }

    fn regenerate_descriptor(&mut self) -> Option<McpConnection> {
        let info = self.connection_info.as_ref()?;
        let key = info.user_api_key.as_deref();
        if self.require_auth_header && key.is_none() {
            warn!("auth header required but no user API key known; descriptor has no headers");
        }
        let descriptor = McpConnection::new(&info.mcp_endpoint, self.require_auth_header, key);
        self.descriptor = Some(descriptor.clone());
        Some(descriptor)
    }
}
