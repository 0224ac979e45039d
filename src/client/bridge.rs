use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::api::ClientApiError;

/// Supplies a fresh ephemeral token for each connection attempt. Failures
/// propagate to the transport; the provider never retries on its own.
pub type TokenProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String, ClientApiError>> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub mcp_endpoint: String,
    pub require_auth_header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub agent_session_id: String,
}

/// Events emitted by the bridge relay, in emission order.
///
/// The serde shape matches relay frames: `{"event": "status", "data": "connected"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum BridgeEvent {
    Status(String),
    ConnectionInfoUpdated(ConnectionInfo),
    AgentConnected(AgentSession),
    AgentDisconnected(AgentSession),
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

/// Ordered single-consumer channel carrying relay events to the state machine.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("bridge relay rejected the request: {0}")]
    Rejected(String),
    #[error("bridge relay unreachable: {0}")]
    Unreachable(String),
}

/// The external bridge relay, consumed as an opaque bidirectional channel.
/// Implementations push every relay event into the [`EventSender`] they were
/// built with.
pub trait BridgeTransport: Send + Sync {
    /// Start (or restart) a connection, pulling a token from `tokens` for
    /// every attempt.
    fn connect(&self, tokens: TokenProvider) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Ask the relay to change the server-side auth requirement for this user.
    fn update_auth_requirement(
        &self,
        require_auth_header: bool,
    ) -> BoxFuture<'_, Result<(), TransportError>>;
}
