//! Browser-side half of the snapp: resolves a session against the API,
//! connects to the bridge relay and keeps the connection state the UI shows.

pub mod api;
pub mod bridge;
pub mod context;
pub mod descriptor;
pub mod machine;
pub mod profile;

pub use api::{ApiClient, AppConfig, ClientApiError, SessionInfo};
pub use bridge::{
    AgentSession, BridgeEvent, BridgeTransport, ConnectionInfo, EventReceiver, EventSender,
    TokenProvider, TransportError, event_channel,
};
pub use context::{
    NotificationReceiver, NotificationSender, SessionContext, ToggleError, notification_channel,
};
pub use descriptor::{McpConnection, client_config, render_client_config, server_label};
pub use machine::{BANNER_TTL, ConnectionMachine, ConnectionState, UiNotification};
pub use profile::{ProfileStore, USER_ID_KEY};
